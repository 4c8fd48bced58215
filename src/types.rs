//! Wire value model and the per-type codecs.

pub mod array;
pub mod codec;
pub mod column_type;
pub mod numeric;
pub mod reader;
pub mod registry;
pub mod temporal;
pub mod value;

pub use codec::{FormatCode, ValueCodec};
pub use column_type::{ColumnType, PG_TYPE_TEXT};
pub use reader::PacketReader;
pub use registry::TypeRegistry;
pub use value::{Numeric, Value};
