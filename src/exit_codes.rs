/// Process exit codes.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    /// Scan, configuration or operation-log errors; nothing was planned or run.
    pub const OPERATIONAL_FAILURE: i32 = 1;
    /// Blocking validation issues; nothing was mutated.
    pub const VALIDATION_FAILURE: i32 = 2;
    /// Some operations failed or a fatal condition stopped the run.
    pub const PARTIAL_FAILURE: i32 = 3;
}
