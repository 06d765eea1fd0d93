use std::sync::Arc;

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Transaction, Txid};
use lightning::chain::chaininterface::BroadcasterInterface;
use lightning_block_sync::http::HttpEndpoint;
use lightning_block_sync::rpc::RpcClient;
use tracing::{error, info};

use crate::config::BitcoindConfig;
use crate::internal::convert::{BlockCount, TxidResponse};

/// bitcoind JSON-RPC used as the chain backend.
#[derive(Clone)]
pub struct BitcoindClient {
    pub bitcoind_rpc_client: Arc<RpcClient>,
    pub handle: tokio::runtime::Handle,
}

impl BitcoindClient {
    pub fn new(config: &BitcoindConfig) -> std::io::Result<Self> {
        let http_endpoint = HttpEndpoint::for_host(config.host.clone()).with_port(config.port);
        let rpc_credentials = base64::encode(format!("{}:{}", config.rpc_user, config.rpc_password));
        let bitcoind_rpc_client = RpcClient::new(&rpc_credentials, http_endpoint)?;

        Ok(Self {
            bitcoind_rpc_client: Arc::new(bitcoind_rpc_client),
            handle: tokio::runtime::Handle::current(),
        })
    }

    pub async fn get_block_count(&self) -> std::io::Result<u32> {
        let count: BlockCount = self.bitcoind_rpc_client.call_method("getblockcount", &[]).await?;
        Ok(count.0)
    }

    pub async fn send_raw_transaction(&self, tx: &Transaction) -> std::io::Result<Txid> {
        let tx_hex = serde_json::json!(serialize_hex(tx));
        let txid: TxidResponse = self
            .bitcoind_rpc_client
            .call_method("sendrawtransaction", &[tx_hex])
            .await?;
        Ok(txid.0)
    }
}

impl BroadcasterInterface for BitcoindClient {
    fn broadcast_transactions(&self, txs: &[&Transaction]) {
        for tx in txs {
            let client = self.clone();
            let tx = (*tx).clone();
            self.handle.spawn(async move {
                match client.send_raw_transaction(&tx).await {
                    Ok(txid) => info!(txid = %txid, "broadcast transaction"),
                    Err(err) => error!(txid = %tx.compute_txid(), error = %err, "broadcast failed"),
                }
            });
        }
    }
}
