//! Script executor interface
//!
//! The executor is an external collaborator: it owns the wire protocol,
//! connection pooling, and retry policy. The lock engine only requires that
//! each script runs atomically against its key set and that failures surface
//! as connectivity errors without partial effects.

use async_trait::async_trait;

use crate::error::Result;
use crate::script::{ScriptArg, ScriptId, ScriptReply};

/// Executes one of the fixed atomic scripts against the store.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run `script` over `keys` with `args`, atomically and without
    /// interleaving with any other script touching the same keys.
    async fn execute(
        &self,
        script: ScriptId,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply>;
}
