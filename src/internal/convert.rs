use std::convert::TryInto;
use std::str::FromStr;

use bitcoin::Txid;
use lightning_block_sync::http::JsonResponse;

fn invalid_data(what: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, format!("unexpected rpc response: {}", what))
}

#[derive(Debug)]
pub struct TxidResponse(pub Txid);

impl TryInto<TxidResponse> for JsonResponse {
    type Error = std::io::Error;
    fn try_into(self) -> std::io::Result<TxidResponse> {
        let hex = self.0.as_str().ok_or_else(|| invalid_data("txid is not a string"))?;
        let txid = Txid::from_str(hex).map_err(|_| invalid_data("txid is not hex"))?;
        Ok(TxidResponse(txid))
    }
}

#[derive(Debug)]
pub struct BlockCount(pub u32);

impl TryInto<BlockCount> for JsonResponse {
    type Error = std::io::Error;
    fn try_into(self) -> std::io::Result<BlockCount> {
        let height = self.0.as_u64().ok_or_else(|| invalid_data("block count is not a number"))?;
        Ok(BlockCount(height as u32))
    }
}
