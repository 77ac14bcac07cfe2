use std::sync::Arc;

use crate::cache::{Lookup, LookupOrigin, TranslationCacheStore, Translator};
use crate::channel::RequestSender;
use crate::error::TranslateError;
use crate::request::{TranslationKey, TranslationRequest};
use crate::server::ProcessRole;

/// What the target program runs with once the fork server hands control back.
///
/// In a forked child the session holds the write end of the request channel,
/// so every unit the child has to translate itself is mirrored by the engine
/// before the next fork. In a standalone run there is nobody to tell and
/// requests go nowhere.
pub struct TargetSession {
    role: ProcessRole,
    sender: RequestSender,
    store: Arc<TranslationCacheStore>,
    translator: Arc<dyn Translator>,
    server_pid: Option<u32>,
}

impl TargetSession {
    pub(crate) fn new(
        role: ProcessRole,
        sender: RequestSender,
        store: Arc<TranslationCacheStore>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            role,
            sender,
            store,
            translator,
            server_pid: None,
        }
    }

    pub(crate) fn with_server_pid(mut self, pid: Option<u32>) -> Self {
        self.server_pid = pid;
        self
    }

    /// Session for a run without a fork server.
    pub fn standalone(store: Arc<TranslationCacheStore>, translator: Arc<dyn Translator>) -> Self {
        Self::new(
            ProcessRole::EngineIdle,
            RequestSender::disconnected(),
            store,
            translator,
        )
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    /// Pid of the fork server engine, if one handed control to us.
    pub fn server_pid(&self) -> Option<u32> {
        self.server_pid
    }

    pub fn is_forked_child(&self) -> bool {
        self.role.is_forked_child()
    }

    pub fn store(&self) -> &Arc<TranslationCacheStore> {
        &self.store
    }

    pub fn translator(&self) -> &Arc<dyn Translator> {
        &self.translator
    }

    /// Resolve `key`, translating on demand.
    ///
    /// A freshly generated unit is also requested from the engine so the
    /// next child inherits it.
    pub fn translate(&self, key: TranslationKey) -> Result<Lookup, TranslateError> {
        let lookup = self.store.lookup_or_generate(key, self.translator.as_ref())?;
        if lookup.origin == LookupOrigin::Generated {
            self.request_translation(key);
        }
        Ok(lookup)
    }

    /// Ask the engine to translate `key` ahead of the next fork.
    pub fn request_translation(&self, key: TranslationKey) -> bool {
        self.submit(&TranslationRequest::block(key))
    }

    /// Record a global node locally and mirror it to the engine.
    pub fn record_node(&self, pc: u64) -> bool {
        self.store.global_update(pc);
        self.submit(&TranslationRequest::global(pc))
    }

    /// Best effort: nothing happens unless this is a forked child with an
    /// open channel.
    fn submit(&self, request: &TranslationRequest) -> bool {
        if !self.role.is_forked_child() {
            return false;
        }
        self.sender.submit(request)
    }
}
