use std::sync::Arc;

use anyhow::Context;

use webserv::auth::MemoryCredentialStore;
use webserv::config::Config;
use webserv::logging;
use webserv::server::{Server, ShutdownHandle};

fn main() -> anyhow::Result<()> {
    // Must run before any thread is spawned so every thread inherits the mask.
    let signals = block_shutdown_signals()?;

    let cfg = Config::load().context("loading configuration")?;
    let _log_guard = logging::init(&cfg.log)?;

    let credentials = Arc::new(MemoryCredentialStore::new());
    let mut server = Server::new(&cfg, credentials).context("starting server")?;
    spawn_signal_waiter(signals, server.shutdown_handle())?;

    server.run()
}

fn block_shutdown_signals() -> anyhow::Result<libc::sigset_t> {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(std::io::Error::from_raw_os_error(rc)).context("blocking signals");
    }
    Ok(set)
}

/// Stops the server on SIGINT or SIGTERM.
fn spawn_signal_waiter(set: libc::sigset_t, handle: ShutdownHandle) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("webserv-signal".to_string())
        .spawn(move || {
            let mut sig: libc::c_int = 0;
            if unsafe { libc::sigwait(&set, &mut sig) } == 0 {
                tracing::info!(signal = sig, "shutdown signal received");
                handle.shutdown();
            }
        })
        .context("spawning signal thread")?;
    Ok(())
}
