use std::fmt;

/// Canonical string form of a value written to, or filtered against, a field.
///
/// Numbers render through `Display`, so `15.1f64` becomes `"15.1"` and `40f64` becomes `"40"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldValue(String);

impl FieldValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue(value.clone())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue(value.to_string())
    }
}

macro_rules! impl_field_value_for_display {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(value: $t) -> Self {
                    FieldValue(value.to_string())
                }
            }
        )*
    };
}

impl_field_value_for_display!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, bool, char);
