//! Property-based test generators using proptest.
//!
//! Strategies produce names and documents the store accepts, so properties
//! can focus on behavior instead of input validation.

use proptest::prelude::*;

/// Strategy for a single valid collection or document name segment.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for a collection path below `/db`, one to three levels deep.
pub fn collection_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(name_strategy(), 1..=3)
        .prop_map(|segments| format!("/db/{}", segments.join("/")))
}

/// Strategy for a document file name.
pub fn document_name_strategy() -> impl Strategy<Value = String> {
    name_strategy().prop_map(|name| format!("{name}.xml"))
}

/// Strategy for text content without markup characters.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 .,]{0,24}").expect("Invalid regex")
}

/// Strategy for a small well-formed XML document.
///
/// The root holds up to five records, each with a title and an optional
/// numeric value, nested at most two levels.
pub fn document_strategy() -> impl Strategy<Value = String> {
    let record = (name_strategy(), text_strategy(), prop::option::of(0u32..10_000))
        .prop_map(|(tag, title, value)| {
            let value = value
                .map(|v| format!("<value>{v}</value>"))
                .unwrap_or_default();
            format!("<{tag}><title>{title}</title>{value}</{tag}>")
        });
    (name_strategy(), prop::collection::vec(record, 0..5))
        .prop_map(|(root, records)| format!("<{root}>{}</{root}>", records.concat()))
}

/// Strategy for an index depth attribute value, valid or not.
pub fn depth_attribute_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..8).prop_map(|d| d.to_string()),
        Just("deep".to_string()),
        Just(String::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::tree::path;

    proptest! {
        #[test]
        fn collection_paths_are_normalized(path in collection_path_strategy()) {
            prop_assert_eq!(path::normalize(&path).unwrap(), path);
        }

        #[test]
        fn document_names_are_valid(name in document_name_strategy()) {
            prop_assert!(path::validate_name(&name).is_ok());
        }

        #[test]
        fn documents_parse(xml in document_strategy()) {
            prop_assert!(arbor_core::index::xml::parse(&xml).is_ok());
        }
    }
}
