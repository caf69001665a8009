mod cleanup;

pub use cleanup::LimiterCleanupTask;
