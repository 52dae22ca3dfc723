pub mod traits;
pub mod web;

#[cfg(test)]
pub mod fake;

pub use traits::{BrowserLauncher, BrowserSession, ElementRef, FrameInfo, Selector};
