//! Wiremock needs a loopback listener. Sandboxed runners sometimes forbid
//! one, so mock-server tests skip there unless `BOOKFETCH_REQUIRE_SOCKET_TESTS`
//! is set.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

const STRICT_VAR: &str = "BOOKFETCH_REQUIRE_SOCKET_TESTS";

fn strict() -> bool {
    std::env::var(STRICT_VAR).is_ok_and(|value| {
        let value = value.trim().to_ascii_lowercase();
        value == "1" || value == "true" || value == "yes"
    })
}

fn loopback_available() -> bool {
    TcpListener::bind(("127.0.0.1", 0)).is_ok()
}

/// Starts a mock server, or returns `None` when loopback is unavailable.
///
/// Panics instead of skipping when the strict variable is set.
#[track_caller]
pub fn start_mock_server_or_skip() -> impl std::future::Future<Output = Option<MockServer>> {
    let caller = Location::caller();
    let available = loopback_available();
    async move {
        if available {
            return Some(MockServer::start().await);
        }
        let note = format!(
            "bookfetch: no loopback socket for mock server ({}:{})",
            caller.file(),
            caller.line()
        );
        assert!(!strict(), "{note}; unset {STRICT_VAR} to skip");
        eprintln!("{note}; skipped");
        None
    }
}
