//! Per-call state handed to every method handler.

use std::sync::Arc;

use orbrpc::CallFlags;
use orbrpc::DecodeContext;

use crate::cancel::CancelToken;
use crate::registry::Registry;

/// What a handler knows about the call it is serving.
pub struct CallContext {
    command_id: u64,
    client: u64,
    flags: CallFlags,
    token: Arc<CancelToken>,
    registry: Arc<Registry>,
}

impl CallContext {
    pub(crate) fn new(
        command_id: u64,
        client: u64,
        flags: CallFlags,
        token: Arc<CancelToken>,
        registry: Arc<Registry>,
    ) -> Self {
        Self { command_id, client, flags, token, registry }
    }

    /// Id under which this call can be cancelled.
    pub fn command_id(&self) -> u64 {
        self.command_id
    }

    /// Session id of the calling client.
    pub fn client(&self) -> u64 {
        self.client
    }

    pub fn flags(&self) -> CallFlags {
        self.flags
    }

    /// Polls the command's cancellation token.
    ///
    /// Long-running handlers call this between units of work and return
    /// `Fault::cancelled()` once it reports true.
    pub fn must_cancel(&self) -> bool {
        self.token.must_cancel()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Server-side decode context backed by the registry.
    pub fn decode_context(&self) -> DecodeContext<'_> {
        DecodeContext::server(self.registry.as_ref())
    }
}
