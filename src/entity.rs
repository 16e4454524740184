//! The contract every migrated record type implements.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record type that can be moved between the two stores.
///
/// The serde bounds exist because the engine shuttles rows through a generic
/// JSON row representation; the constants describe where the rows live so the
/// SQL-backed store can generate its statements.
///
/// Implementations must keep `id()` immutable for the lifetime of the row and
/// `equals()` reflexive. `equals()` should compare every user-visible column;
/// machine-generated diagnostic columns unique to one store may be excluded,
/// anything the application reads back may not.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Table name, identical in both stores (schema transformation is out of
    /// scope for this engine).
    const TABLE: &'static str;

    /// Full column list, `id` included. Also the default overwrite list used
    /// by the fixer.
    const COLUMNS: &'static [&'static str];

    /// Stable primary key.
    fn id(&self) -> i64;

    /// Full-value comparison against another copy of the same logical row.
    fn equals(&self, other: &Self) -> bool;
}
