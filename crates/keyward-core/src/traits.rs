//! Boundary traits toward network collaborators.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::UnspentOutput;

/// Network metadata needed to judge confirmation depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Current virtual DAA score of the chain.
    pub current_chain_score: u64,
}

/// Source of unspent outputs and chain metadata (an indexer or node client).
///
/// The selector and keyrings only consume what this returns; they never
/// fetch anything themselves.
#[async_trait]
pub trait UtxoSource: Send + Sync {
    async fn network_info(&self) -> Result<NetworkInfo, SourceError>;

    async fn query_utxos(&self, address: &str) -> Result<Vec<UnspentOutput>, SourceError>;
}
