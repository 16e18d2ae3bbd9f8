//! Values returned by the primary server.
//!
//! The wire layer decodes every reply into a [`Value`]. Nothing above the
//! connection boundary inspects raw wire types; the protocol codec and the
//! server tree pattern-match on this enum instead.

use std::fmt;

/// A dynamically-typed value as returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Generic null (`::`).
    Null,
    Bool(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Real(f32),
    Float(f64),
    Char(char),
    Symbol(String),
    Bools(Vec<bool>),
    Bytes(Vec<u8>),
    Shorts(Vec<i16>),
    Ints(Vec<i32>),
    Longs(Vec<i64>),
    Floats(Vec<f64>),
    /// Character vector (a string).
    Chars(String),
    Symbols(Vec<String>),
    /// Mixed list.
    List(Vec<Value>),
    /// Dictionary of keys to values; both sides are vectors of equal length.
    Dict(Box<Value>, Box<Value>),
    Table(Table),
}

/// Column-oriented table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    /// Column names, in order.
    pub columns: Vec<String>,
    /// One column vector per name.
    pub data: Vec<Value>,
}

impl Table {
    /// Create a table from column names and column vectors.
    pub fn new(columns: Vec<String>, data: Vec<Value>) -> Self {
        Self { columns, data }
    }

    /// Number of rows (length of the first column).
    pub fn row_count(&self) -> usize {
        self.data.first().map(Value::len).unwrap_or(0)
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Look up a column vector by name.
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.iter().position(|c| c == name).and_then(|i| self.data.get(i))
    }
}

impl Value {
    /// Build a character vector.
    pub fn chars(text: impl Into<String>) -> Self {
        Self::Chars(text.into())
    }

    /// Build a symbol atom.
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    /// Build a dictionary.
    pub fn dict(keys: Value, values: Value) -> Self {
        Self::Dict(Box::new(keys), Box::new(values))
    }

    /// Get a boolean atom.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get an integral atom widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Short(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Get a short atom.
    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Self::Short(v) => Some(*v),
            _ => None,
        }
    }

    /// Get text from a string, symbol or char.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Chars(s) | Self::Symbol(s) => Some(s.clone()),
            Self::Char(c) => Some(c.to_string()),
            _ => None,
        }
    }

    /// Get a symbol vector. The empty mixed list counts as an empty vector.
    pub fn as_symbols(&self) -> Option<&[String]> {
        match self {
            Self::Symbols(v) => Some(v),
            Self::List(v) if v.is_empty() => Some(&[]),
            _ => None,
        }
    }

    /// Get the items of a mixed list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Check for the generic null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Count of items; atoms count as one.
    pub fn len(&self) -> usize {
        match self {
            Self::Bools(v) => v.len(),
            Self::Bytes(v) => v.len(),
            Self::Shorts(v) => v.len(),
            Self::Ints(v) => v.len(),
            Self::Longs(v) => v.len(),
            Self::Floats(v) => v.len(),
            Self::Chars(s) => s.chars().count(),
            Self::Symbols(v) => v.len(),
            Self::List(v) => v.len(),
            Self::Dict(keys, _) => keys.len(),
            Self::Table(t) => t.row_count(),
            _ => 1,
        }
    }

    /// Check for an empty vector.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type name used in log messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Byte(_) => "byte",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Real(_) => "real",
            Self::Float(_) => "float",
            Self::Char(_) => "char",
            Self::Symbol(_) => "symbol",
            Self::Bools(_) => "boolean list",
            Self::Bytes(_) => "byte list",
            Self::Shorts(_) => "short list",
            Self::Ints(_) => "int list",
            Self::Longs(_) => "long list",
            Self::Floats(_) => "float list",
            Self::Chars(_) => "string",
            Self::Symbols(_) => "symbol list",
            Self::List(_) => "list",
            Self::Dict(..) => "dictionary",
            Self::Table(_) => "table",
        }
    }

    /// Tabular view of this value, if it has one.
    ///
    /// Plain tables are returned as-is. Keyed tables (a dictionary from a
    /// table to a table) are flattened with the key columns first.
    pub fn to_table(&self) -> Option<Table> {
        match self {
            Self::Table(t) => Some(t.clone()),
            Self::Dict(keys, values) => match (keys.as_ref(), values.as_ref()) {
                (Self::Table(k), Self::Table(v)) => {
                    let mut columns = k.columns.clone();
                    columns.extend(v.columns.iter().cloned());
                    let mut data = k.data.clone();
                    data.extend(v.data.iter().cloned());
                    Some(Table { columns, data })
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn fmt_float(f: f64) -> String {
    if f.is_nan() {
        "0n".to_string()
    } else if f.is_infinite() {
        let inf = if f > 0.0 { "0w" } else { "-0w" };
        inf.to_string()
    } else {
        f.to_string()
    }
}

fn fmt_vector<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    empty: &str,
    suffix: &str,
    item: impl Fn(&T) -> String,
) -> fmt::Result {
    match items.len() {
        0 => f.write_str(empty),
        1 => write!(f, "enlist {}{}", item(&items[0]), suffix),
        _ => {
            let joined: Vec<String> = items.iter().map(item).collect();
            write!(f, "{}{}", joined.join(" "), suffix)
        }
    }
}

fn escape_chars(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders the value on one line in the server's own literal notation.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("::"),
            Self::Bool(b) => write!(f, "{}b", u8::from(*b)),
            Self::Byte(b) => write!(f, "0x{b:02x}"),
            Self::Short(v) => write!(f, "{v}h"),
            Self::Int(v) => write!(f, "{v}i"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{}e", fmt_float(f64::from(*v))),
            Self::Float(v) => f.write_str(&fmt_float(*v)),
            Self::Char(c) => write!(f, "\"{}\"", escape_chars(&c.to_string())),
            Self::Symbol(s) => write!(f, "`{s}"),
            Self::Bools(v) => {
                if v.is_empty() {
                    f.write_str("`boolean$()")
                } else {
                    let bits: String = v.iter().map(|b| if *b { '1' } else { '0' }).collect();
                    write!(f, "{bits}b")
                }
            }
            Self::Bytes(v) => {
                if v.is_empty() {
                    f.write_str("`byte$()")
                } else {
                    let hex: String = v.iter().map(|b| format!("{b:02x}")).collect();
                    write!(f, "0x{hex}")
                }
            }
            Self::Shorts(v) => fmt_vector(f, v, "`short$()", "h", |x| x.to_string()),
            Self::Ints(v) => fmt_vector(f, v, "`int$()", "i", |x| x.to_string()),
            Self::Longs(v) => fmt_vector(f, v, "`long$()", "", |x| x.to_string()),
            Self::Floats(v) => fmt_vector(f, v, "`float$()", "", |x| fmt_float(*x)),
            Self::Chars(s) => write!(f, "\"{}\"", escape_chars(s)),
            Self::Symbols(v) => {
                if v.is_empty() {
                    f.write_str("`symbol$()")
                } else if v.len() == 1 {
                    write!(f, "enlist `{}", v[0])
                } else {
                    v.iter().try_for_each(|s| write!(f, "`{s}"))
                }
            }
            Self::List(items) => match items.len() {
                0 => f.write_str("()"),
                1 => write!(f, "enlist {}", items[0]),
                _ => {
                    f.write_str("(")?;
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            f.write_str(";")?;
                        }
                        write!(f, "{item}")?;
                    }
                    f.write_str(")")
                }
            },
            Self::Dict(keys, values) => write!(f, "{keys}!{values}"),
            Self::Table(t) => {
                let keys = Value::Symbols(t.columns.clone());
                let values = Value::List(t.data.clone());
                write!(f, "+{keys}!{values}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoms_render_in_literal_notation() {
        assert_eq!(Value::Bool(true).to_string(), "1b");
        assert_eq!(Value::Short(3).to_string(), "3h");
        assert_eq!(Value::Long(42).to_string(), "42");
        assert_eq!(Value::symbol("trade").to_string(), "`trade");
        assert_eq!(Value::chars("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(Value::Null.to_string(), "::");
    }

    #[test]
    fn test_vectors_render_in_literal_notation() {
        assert_eq!(Value::Longs(vec![1, 2, 3]).to_string(), "1 2 3");
        assert_eq!(Value::Longs(vec![7]).to_string(), "enlist 7");
        assert_eq!(Value::Longs(vec![]).to_string(), "`long$()");
        assert_eq!(Value::Bools(vec![true, false, true]).to_string(), "101b");
        assert_eq!(
            Value::Symbols(vec!["a".into(), "b".into()]).to_string(),
            "`a`b"
        );
        assert_eq!(
            Value::List(vec![Value::Long(1), Value::symbol("x")]).to_string(),
            "(1;`x)"
        );
    }

    #[test]
    fn test_table_renders_as_flipped_dictionary() {
        let t = Table::new(
            vec!["a".into(), "b".into()],
            vec![Value::Longs(vec![1, 2]), Value::Longs(vec![3, 4])],
        );
        assert_eq!(Value::Table(t).to_string(), "+`a`b!(1 2;3 4)");
    }

    #[test]
    fn test_keyed_table_flattens_key_columns_first() {
        let keys = Table::new(vec!["sym".into()], vec![Value::Symbols(vec!["a".into()])]);
        let values = Table::new(vec!["px".into()], vec![Value::Floats(vec![1.5])]);
        let keyed = Value::dict(Value::Table(keys), Value::Table(values));

        let flat = keyed.to_table().expect("keyed table has tabular view");
        assert_eq!(flat.columns, vec!["sym".to_string(), "px".to_string()]);
        assert_eq!(flat.row_count(), 1);
        assert_eq!(flat.column("px"), Some(&Value::Floats(vec![1.5])));
    }

    #[test]
    fn test_plain_dictionary_has_no_tabular_view() {
        let d = Value::dict(Value::Symbols(vec!["a".into()]), Value::Longs(vec![1]));
        assert!(d.to_table().is_none());
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_empty_list_counts_as_empty_symbols() {
        assert_eq!(Value::List(vec![]).as_symbols(), Some(&[][..]));
        assert!(Value::Longs(vec![]).as_symbols().is_none());
    }
}
