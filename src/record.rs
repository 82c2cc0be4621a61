use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::fmt::Debug;

/// A `Record` is a flat piece of beacon data: client info, task client data, or anything
/// else that ends up as top-level fields of the outbound payload.
///
/// Records are plain serde structs. Use the [`crate::macros::record`] attribute to derive
/// the required traits and the implementation in one go.
///
/// # Example
/// ```rust
/// use insight::{Record, macros::record};
///
/// #[record]
/// struct Hop {
///     pop: String,
///     rtt_ms: u32,
/// }
///
/// let fields = Hop { pop: "LCY".into(), rtt_ms: 12 }.to_fields();
/// assert_eq!(fields["pop"], "LCY");
/// ```
pub trait Record
where
    Self: Serialize + DeserializeOwned + PartialEq + Send + Sync + Debug + Clone,
{
    /// Flatten the record into a JSON object.
    ///
    /// Records that do not serialize to an object produce no fields.
    fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
