//! Canonical key names. Every key the crate touches is built here so that data written by a
//! previous deployment stays addressable.

/// Class prefix used in every key of a model: lowercase name, namespaced when a namespace is set.
pub fn class_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_lowercase()
    } else {
        format!("{}:{}", namespace, name.to_lowercase())
    }
}

/// Key holding the value of one field of one instance.
pub fn instance_key(class: &str, id: &str, field: &str) -> String {
    format!("{class}:{id}:{field}")
}

/// Key of the index entry for `value` of `field`.
pub fn index_key(class: &str, field: &str, value: &str) -> String {
    format!("{class}:{field}:{value}")
}

/// Set of every registered identifier of the class.
pub fn collection_key(class: &str) -> String {
    format!("{class}:collection")
}

/// Hash holding the hash-entry fields of one instance.
pub fn hash_key(class: &str, id: &str) -> String {
    format!("{class}:{id}")
}

/// Counter backing auto-incremented identifiers.
pub fn counter_key(class: &str) -> String {
    format!("{class}:max_pk")
}

/// Sort/get pattern resolving a string field for every member of a set.
pub fn field_pattern(class: &str, field: &str) -> String {
    format!("{class}:*:{field}")
}

/// Sort/get pattern resolving a hash-entry field for every member of a set.
pub fn hash_pattern(class: &str, field: &str) -> String {
    format!("{class}:*->{field}")
}

/// Pattern returning the member itself.
pub const MEMBER_PATTERN: &str = "#";

pub fn temp_key(prefix: &str) -> String {
    format!("{}:{:016x}", prefix, rand::random::<u64>())
}
