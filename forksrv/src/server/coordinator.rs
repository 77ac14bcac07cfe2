//! The persistent fork server loop.
//!
//! ```text
//!   bootstrap cache tables
//!   hello ──(short write)──▶ standalone: return once, no fork server
//!   loop {
//!       await go            ──(EOF)──▶ exit 2
//!       open request pipe   ──(err)──▶ exit 3
//!       split               ──(err)──▶ exit 4
//!         child:  close driver fds + read end, return to the target
//!         parent: report pid              ──(err)──▶ exit 5
//!                 drain requests until the child closes the pipe
//!                 wait for the child      ──(err)──▶ exit 6
//!                 report status           ──(err)──▶ exit 7
//!   }
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;

use super::config::ForkServerConfig;
use super::handshake::DriverLink;
use super::role::ProcessRole;
use super::split::{OsFork, Split, Splitter};
use crate::cache::{TranslationCacheStore, Translator};
use crate::channel::{self, RequestSender};
use crate::error::ForkServerError;
use crate::session::TargetSession;

/// Coordinator context for one engine process.
///
/// Owns the driver link, the fork primitive and the process role. The cache
/// store and translator are shared with the [`TargetSession`] it returns.
pub struct ForkServer<S = OsFork, R = File, W = File> {
    config: ForkServerConfig,
    link: Option<DriverLink<R, W>>,
    splitter: S,
    store: Arc<TranslationCacheStore>,
    translator: Arc<dyn Translator>,
    role: ProcessRole,
    server_pid: Option<u32>,
    rounds: u64,
}

impl ForkServer<OsFork, File, File> {
    /// Attach to the driver descriptors named by `config`, forking for real.
    pub fn attach(
        config: ForkServerConfig,
        store: Arc<TranslationCacheStore>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        let link = DriverLink::open(&config);
        Self::with_parts(config, link, OsFork, store, translator)
    }
}

impl<S: Splitter, R: Read, W: Write> ForkServer<S, R, W> {
    /// Build a coordinator from explicit parts. `link = None` means no
    /// driver is present.
    pub fn with_parts(
        config: ForkServerConfig,
        link: Option<DriverLink<R, W>>,
        splitter: S,
        store: Arc<TranslationCacheStore>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            config,
            link,
            splitter,
            store,
            translator,
            role: ProcessRole::EngineIdle,
            server_pid: None,
            rounds: 0,
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn store(&self) -> &Arc<TranslationCacheStore> {
        &self.store
    }

    /// Run the fork server.
    ///
    /// Returns only in a forked child, or once in the engine itself if no
    /// driver answers the hello. In the engine the loop otherwise ends with
    /// the first fatal error.
    pub fn run(mut self) -> Result<TargetSession, ForkServerError> {
        if self.store.bootstrap() {
            log::debug!("[ForkServer] cache tables ready");
        }

        let Some(mut link) = self.link.take() else {
            log::info!("[ForkServer] no driver descriptors, running once");
            return Ok(self.into_session(RequestSender::disconnected()));
        };

        if let Err(e) = link.send_hello() {
            log::info!("[ForkServer] driver not listening ({}), running once", e);
            return Ok(self.into_session(RequestSender::disconnected()));
        }

        let pid = std::process::id();
        self.server_pid = Some(pid);
        log::info!(
            "[ForkServer] serving on fds {}/{} (pid {})",
            self.config.control_fd,
            self.config.status_fd,
            pid
        );

        loop {
            if let Some(sender) = self.serve_round(&mut link)? {
                // Dropping `link` closes the driver descriptors in the child.
                drop(link);
                return Ok(self.into_session(sender));
            }
        }
    }

    /// Like [`run`](Self::run), but a fatal error terminates the process with
    /// the exit code the driver expects.
    pub fn run_or_exit(self) -> TargetSession {
        match self.run() {
            Ok(session) => session,
            Err(e) => {
                log::error!("[ForkServer] {}", e);
                std::process::exit(e.exit_code());
            }
        }
    }

    /// One round. `Some(sender)` means we are now the child.
    fn serve_round(
        &mut self,
        link: &mut DriverLink<R, W>,
    ) -> Result<Option<RequestSender>, ForkServerError> {
        link.await_go().map_err(|_| ForkServerError::DriverGone)?;

        let (sender, receiver) =
            channel::open(self.config.request_fd).map_err(ForkServerError::Channel)?;

        let child = match self.splitter.split(sender).map_err(ForkServerError::Fork)? {
            Split::Child(sender) => {
                self.role = ProcessRole::ForkedChild;
                // The child only writes.
                drop(receiver);
                return Ok(Some(sender));
            }
            Split::Parent { child } => child,
        };

        self.role = ProcessRole::EngineDriving { child };
        link.report_child(child)
            .map_err(|source| ForkServerError::ReportPid { pid: child, source })?;

        let report = self.store.drain(receiver, self.translator.as_ref());

        let status = self
            .splitter
            .wait(child)
            .map_err(|source| ForkServerError::Wait { pid: child, source })?;
        link.report_status(status)
            .map_err(|source| ForkServerError::ReportStatus { status, source })?;

        self.role = ProcessRole::EngineIdle;
        self.rounds += 1;
        log::debug!(
            "[ForkServer] round {}: child {} status {:#x}, {} requests ({} generated, {} cached, {} out of range)",
            self.rounds,
            child,
            status,
            report.received,
            report.generated,
            report.already_cached,
            report.out_of_range
        );

        Ok(None)
    }

    fn into_session(self, sender: RequestSender) -> TargetSession {
        TargetSession::new(self.role, sender, self.store, self.translator)
            .with_server_pid(self.server_pid)
    }
}
