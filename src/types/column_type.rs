use crate::error::{ProxyError, ProxyResult};

/// Closed set of wire type identifiers understood by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Parameter type left for the server to infer (oid 0). Never a result column type.
    Unspecified,
    Bool,
    Bytea,
    Int8,
    Int2,
    Int4,
    Text,
    Float4,
    Float8,
    Bpchar,
    Varchar,
    Date,
    Time,
    Timestamp,
    Numeric,
    Uuid,
    BoolArray,
    ByteaArray,
    Int8Array,
    Int2Array,
    Int4Array,
    TextArray,
    Float4Array,
    Float8Array,
    BpcharArray,
    VarcharArray,
    DateArray,
    TimeArray,
    TimestampArray,
    NumericArray,
    UuidArray,
}

pub const PG_TYPE_TEXT: i32 = 25;

impl ColumnType {
    pub const ALL: [ColumnType; 31] = [
        ColumnType::Unspecified,
        ColumnType::Bool,
        ColumnType::Bytea,
        ColumnType::Int8,
        ColumnType::Int2,
        ColumnType::Int4,
        ColumnType::Text,
        ColumnType::Float4,
        ColumnType::Float8,
        ColumnType::Bpchar,
        ColumnType::Varchar,
        ColumnType::Date,
        ColumnType::Time,
        ColumnType::Timestamp,
        ColumnType::Numeric,
        ColumnType::Uuid,
        ColumnType::BoolArray,
        ColumnType::ByteaArray,
        ColumnType::Int8Array,
        ColumnType::Int2Array,
        ColumnType::Int4Array,
        ColumnType::TextArray,
        ColumnType::Float4Array,
        ColumnType::Float8Array,
        ColumnType::BpcharArray,
        ColumnType::VarcharArray,
        ColumnType::DateArray,
        ColumnType::TimeArray,
        ColumnType::TimestampArray,
        ColumnType::NumericArray,
        ColumnType::UuidArray,
    ];

    pub fn oid(self) -> i32 {
        match self {
            ColumnType::Unspecified => 0,
            ColumnType::Bool => 16,
            ColumnType::Bytea => 17,
            ColumnType::Int8 => 20,
            ColumnType::Int2 => 21,
            ColumnType::Int4 => 23,
            ColumnType::Text => 25,
            ColumnType::Float4 => 700,
            ColumnType::Float8 => 701,
            ColumnType::Bpchar => 1042,
            ColumnType::Varchar => 1043,
            ColumnType::Date => 1082,
            ColumnType::Time => 1083,
            ColumnType::Timestamp => 1114,
            ColumnType::Numeric => 1700,
            ColumnType::Uuid => 2950,
            ColumnType::BoolArray => 1000,
            ColumnType::ByteaArray => 1001,
            ColumnType::Int8Array => 1016,
            ColumnType::Int2Array => 1005,
            ColumnType::Int4Array => 1007,
            ColumnType::TextArray => 1009,
            ColumnType::Float4Array => 1021,
            ColumnType::Float8Array => 1022,
            ColumnType::BpcharArray => 1014,
            ColumnType::VarcharArray => 1015,
            ColumnType::DateArray => 1182,
            ColumnType::TimeArray => 1183,
            ColumnType::TimestampArray => 1115,
            ColumnType::NumericArray => 1231,
            ColumnType::UuidArray => 2951,
        }
    }

    pub fn from_oid(oid: i32) -> ProxyResult<ColumnType> {
        ColumnType::ALL
            .iter()
            .copied()
            .find(|t| t.oid() == oid)
            .ok_or(ProxyError::UnsupportedType(oid))
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Unspecified => "unspecified",
            ColumnType::Bool => "bool",
            ColumnType::Bytea => "bytea",
            ColumnType::Int8 => "int8",
            ColumnType::Int2 => "int2",
            ColumnType::Int4 => "int4",
            ColumnType::Text => "text",
            ColumnType::Float4 => "float4",
            ColumnType::Float8 => "float8",
            ColumnType::Bpchar => "bpchar",
            ColumnType::Varchar => "varchar",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Numeric => "numeric",
            ColumnType::Uuid => "uuid",
            ColumnType::BoolArray => "_bool",
            ColumnType::ByteaArray => "_bytea",
            ColumnType::Int8Array => "_int8",
            ColumnType::Int2Array => "_int2",
            ColumnType::Int4Array => "_int4",
            ColumnType::TextArray => "_text",
            ColumnType::Float4Array => "_float4",
            ColumnType::Float8Array => "_float8",
            ColumnType::BpcharArray => "_bpchar",
            ColumnType::VarcharArray => "_varchar",
            ColumnType::DateArray => "_date",
            ColumnType::TimeArray => "_time",
            ColumnType::TimestampArray => "_timestamp",
            ColumnType::NumericArray => "_numeric",
            ColumnType::UuidArray => "_uuid",
        }
    }

    /// Lookup by type name as used in fixtures (`int4`, `_text`, `varchar`, ...).
    pub fn from_name(name: &str) -> Option<ColumnType> {
        let lowered = name.trim().to_ascii_lowercase();
        let canonical = match lowered.as_str() {
            "integer" | "int" => "int4",
            "bigint" => "int8",
            "smallint" => "int2",
            "boolean" => "bool",
            "real" => "float4",
            "double precision" | "double" => "float8",
            "decimal" => "numeric",
            other => other,
        };
        ColumnType::ALL.iter().copied().find(|t| t.name() == canonical)
    }

    /// Element type of an array type, `None` for scalars.
    pub fn element(self) -> Option<ColumnType> {
        match self {
            ColumnType::BoolArray => Some(ColumnType::Bool),
            ColumnType::ByteaArray => Some(ColumnType::Bytea),
            ColumnType::Int8Array => Some(ColumnType::Int8),
            ColumnType::Int2Array => Some(ColumnType::Int2),
            ColumnType::Int4Array => Some(ColumnType::Int4),
            ColumnType::TextArray => Some(ColumnType::Text),
            ColumnType::Float4Array => Some(ColumnType::Float4),
            ColumnType::Float8Array => Some(ColumnType::Float8),
            ColumnType::BpcharArray => Some(ColumnType::Bpchar),
            ColumnType::VarcharArray => Some(ColumnType::Varchar),
            ColumnType::DateArray => Some(ColumnType::Date),
            ColumnType::TimeArray => Some(ColumnType::Time),
            ColumnType::TimestampArray => Some(ColumnType::Timestamp),
            ColumnType::NumericArray => Some(ColumnType::Numeric),
            ColumnType::UuidArray => Some(ColumnType::Uuid),
            _ => None,
        }
    }

    /// Fixed binary width in bytes, `None` for variable-length types.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            ColumnType::Bool => Some(1),
            ColumnType::Int2 => Some(2),
            ColumnType::Int4 | ColumnType::Float4 | ColumnType::Date => Some(4),
            ColumnType::Int8 | ColumnType::Float8 | ColumnType::Time | ColumnType::Timestamp => Some(8),
            ColumnType::Uuid => Some(16),
            _ => None,
        }
    }

    /// Type size as advertised in RowDescription (-1 = variable).
    pub fn type_size(self) -> i16 {
        self.fixed_len().map(|n| n as i16).unwrap_or(-1)
    }

    /// Whether array elements of this type may be NULL. Primitive element types reject NULL.
    pub fn nullable_element(self) -> bool {
        !matches!(
            self,
            ColumnType::Bool | ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8 | ColumnType::Float4 | ColumnType::Float8
        )
    }
}
