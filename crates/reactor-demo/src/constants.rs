/// Callback identity the demo registers with the Continuation Middleware.
pub const DEMO_CALLBACK_CLASS: &str = "DemoCallback";

/// How often the demo prints an in-flight/queue depth summary line.
pub const STATUS_TICK_SECS: u64 = 5;
