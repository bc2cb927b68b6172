use hashbrown::HashMap;

use crate::types::OperationId;

pub type VecIndex<K> = HashMap<K, Vec<OperationId>>;
