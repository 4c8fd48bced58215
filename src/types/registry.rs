use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{ProxyError, ProxyResult};
use crate::types::{ColumnType, ValueCodec};

static GLOBAL: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::build);

/// Read-only map from type oid to codec, built once per process.
#[derive(Debug)]
pub struct TypeRegistry {
    codecs: HashMap<i32, ValueCodec>,
}

impl TypeRegistry {
    fn build() -> Self {
        let codecs = ColumnType::ALL
            .iter()
            .filter_map(|t| ValueCodec::build(*t).map(|c| (t.oid(), c)))
            .collect();
        TypeRegistry { codecs }
    }

    pub fn global() -> &'static TypeRegistry { &GLOBAL }

    /// Codec for a wire type oid. Unknown oids are a hard error, never a fallback.
    pub fn codec_for(&self, oid: i32) -> ProxyResult<&ValueCodec> {
        self.codecs.get(&oid).ok_or(ProxyError::UnsupportedType(oid))
    }

    pub fn codec_for_type(&self, t: ColumnType) -> ProxyResult<&ValueCodec> { self.codec_for(t.oid()) }

    pub fn len(&self) -> usize { self.codecs.len() }

    pub fn is_empty(&self) -> bool { self.codecs.is_empty() }
}
