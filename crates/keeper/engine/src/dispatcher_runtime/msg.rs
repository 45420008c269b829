/// Control messages of the dispatcher runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherMsg {
    /// New requests were written, stop idling.
    Wake,
    /// Finish the current request and stop.
    Shutdown,
}
