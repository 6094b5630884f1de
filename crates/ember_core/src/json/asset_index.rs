//! The asset index: virtual asset path to content hash and size.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssetIndexMap {
    pub objects: BTreeMap<String, AssetObject>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}
