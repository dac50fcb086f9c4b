//! Request parameters decoded from query strings and url-encoded form bodies.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;

/// A single parameter value: either one string or a list of them.
///
/// A key becomes a list when it repeats (`a=1&a=2`) or carries the `[]`
/// suffix (`tag[]=x`). `Single("x")` and `List(["x"])` are distinct values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    List(Vec<String>),
}

impl ParamValue {
    /// The first (or only) value.
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(v) => Some(v.as_str()),
            Self::List(vs) => vs.first().map(String::as_str),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            Self::Single(existing) => {
                let first = std::mem::take(existing);
                *self = Self::List(vec![first, value]);
            }
            Self::List(values) => values.push(value),
        }
    }

    fn encoded(&self) -> Self {
        match self {
            Self::Single(v) => Self::Single(encode_text(v)),
            Self::List(vs) => Self::List(vs.iter().map(|v| encode_text(v)).collect()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(v) => f.write_str(v),
            Self::List(vs) => write!(f, "[{}]", vs.join(", ")),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

/// One key/value pair in both its decoded and its canonical encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    key: String,
    value: ParamValue,
    encoded: ParamValue,
}

impl Slot {
    fn push(&mut self, value: Component) {
        self.value.push(value.text);
        self.encoded.push(value.encoded);
    }
}

/// A decoded component plus the percent-encoding of its exact bytes.
struct Component {
    text: String,
    encoded: String,
}

impl Component {
    fn from_wire(raw: &str) -> Self {
        let spaced = raw.replace('+', " ");
        let bytes = urlencoding::decode_binary(spaced.as_bytes());
        Self {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            encoded: urlencoding::encode_binary(&bytes).into_owned(),
        }
    }

    fn from_text(text: String) -> Self {
        let encoded = encode_text(&text);
        Self { text, encoded }
    }

    /// `tag[]` -> `tag`, for keys that always hold a list.
    fn list_base(&self) -> Option<Self> {
        let text = self.text.strip_suffix("[]")?;
        let encoded = self.encoded.strip_suffix("%5B%5D")?;
        Some(Self {
            text: text.to_owned(),
            encoded: encoded.to_owned(),
        })
    }
}

fn encode_text(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

/// Decoded request parameters, ordered by key.
///
/// Ordering by key makes two parameter sets built from differently ordered
/// query strings compare (and render) equal.
///
/// Every pair also keeps a canonical encoded form (see
/// [`encoded`](Self::encoded)) that is exact even when the decoded bytes are
/// not UTF-8, so `k=%FF` and `k=%25FF` stay distinct.
///
/// # Examples
///
/// ```
/// use readthrough::http::{ParamValue, Params};
///
/// let params = Params::parse_urlencoded("color=red&tag[]=a&tag[]=b&q=hello+world");
/// assert_eq!(params.get_str("color"), Some("red"));
/// assert_eq!(params.get_str("q"), Some("hello world"));
/// assert_eq!(
///     params.get("tag"),
///     Some(&ParamValue::List(vec!["a".into(), "b".into()]))
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    // Keyed by the encoded key.
    map: BTreeMap<String, Slot>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes an `application/x-www-form-urlencoded` string.
    ///
    /// `+` decodes to a space and `%XX` sequences are percent-decoded. Bytes
    /// that are not UTF-8 read back as U+FFFD but keep their exact encoded
    /// form. Empty pairs (`a=1&&b=2`) are skipped; a bare key (`flag`) gets
    /// an empty value.
    pub fn parse_urlencoded(input: &str) -> Self {
        let mut params = Self::new();
        for pair in input.split('&').filter(|p| !p.is_empty()) {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = Component::from_wire(raw_key);
            let value = Component::from_wire(raw_value);

            match key.list_base() {
                Some(base) => params.push(base, value, true),
                None => params.push(key, value, false),
            }
        }
        params
    }

    /// Replaces any existing value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = Component::from_text(key.into());
        let value = value.into();
        let slot = Slot {
            key: key.text,
            encoded: value.encoded(),
            value,
        };
        self.map.insert(key.encoded, slot);
    }

    /// Adds `value` under `key`, turning an existing single value into a list.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.push(
            Component::from_text(key.into()),
            Component::from_text(value.into()),
            false,
        );
    }

    fn push(&mut self, key: Component, value: Component, as_list: bool) {
        match self.map.entry(key.encoded) {
            Entry::Vacant(slot) => {
                let (value, encoded) = if as_list {
                    (
                        ParamValue::List(vec![value.text]),
                        ParamValue::List(vec![value.encoded]),
                    )
                } else {
                    (
                        ParamValue::Single(value.text),
                        ParamValue::Single(value.encoded),
                    )
                };
                slot.insert(Slot {
                    key: key.text,
                    value,
                    encoded,
                });
            }
            Entry::Occupied(mut slot) => slot.get_mut().push(value),
        }
    }

    /// Adds every key of `other` that `self` does not already have.
    pub fn merge_missing(&mut self, other: Params) {
        for (key, slot) in other.map {
            self.map.entry(key).or_insert(slot);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.map.get(&encode_text(key)).map(|slot| &slot.value)
    }

    /// First value for `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::first)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Decoded entries, ordered by encoded key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.map.values().map(|slot| (slot.key.as_str(), &slot.value))
    }

    /// Entries as percent-encoded text (RFC 3986 unreserved characters stay
    /// literal). Distinct byte strings never encode alike, and equivalent
    /// spellings (`+`, `%20`, `%41` vs `A`) encode the same.
    pub fn encoded(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.map.iter().map(|(key, slot)| (key.as_str(), &slot.encoded))
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}
