//! Unit tests for the Engine logging facade
//!
//! LOGGER is a global OnceLock shared across all tests, so every test
//! here is marked #[serial].

use crate::keystone::Engine;
use crate::keystone::log::{Logger, LogEntry, LogSeverity};
use std::sync::{Arc, Mutex};
use serial_test::serial;

// ============================================================================
// TEST HELPERS
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        // Other tests log concurrently through the same global logger
        if entry.source != "keystone::test" {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        entries.push(format!("{:?}: {}", entry.severity, entry.message));
    }
}

fn install() -> Arc<Mutex<Vec<String>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    Engine::set_logger(TestLogger { entries: entries.clone() });
    entries
}

// ============================================================================
// LOGGING API TESTS
// ============================================================================

#[test]
#[serial]
fn test_set_logger_receives_entries() {
    let entries = install();

    Engine::log(LogSeverity::Info, "keystone::test", "hello".to_string());
    Engine::log_detailed(LogSeverity::Error, "keystone::test", "boom".to_string(), "x.rs", 9);

    let logged = entries.lock().unwrap();
    assert_eq!(logged.as_slice(), ["Info: hello", "Error: boom"]);
    drop(logged);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_min_severity_filters_entries() {
    let entries = install();
    Engine::set_min_severity(LogSeverity::Warn);
    assert_eq!(Engine::min_severity(), LogSeverity::Warn);

    crate::engine_debug!("keystone::test", "dropped");
    crate::engine_info!("keystone::test", "dropped too");
    crate::engine_warn!("keystone::test", "kept");
    crate::engine_error!("keystone::test", "kept as well");

    assert_eq!(entries.lock().unwrap().len(), 2);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_reset_logger_restores_trace_level() {
    let _entries = install();
    Engine::set_min_severity(LogSeverity::Error);
    Engine::reset_logger();
    assert_eq!(Engine::min_severity(), LogSeverity::Trace);
}

#[test]
#[serial]
fn test_logging_from_worker_threads() {
    let entries = install();

    let handles: Vec<_> = (0..4)
        .map(|i| std::thread::spawn(move || {
            crate::engine_trace!("keystone::test", "worker {}", i);
        }))
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(entries.lock().unwrap().len(), 4);
    Engine::reset_logger();
}
