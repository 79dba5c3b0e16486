use proptest::prelude::*;
use tether_keypath::{is_related, join_keypath, split_keypath, KeypathError, MAX_DEPTH};

#[test]
fn bracket_and_dot_notation_address_the_same_keypath() {
    let cases = [
        ("items[0].name", "items.0.name"),
        ("foo[\"bar\"][\"baz\"]", "foo.bar.baz"),
        ("foo['bar'][1]", "foo.bar.1"),
        ("a.b.c", "a.b.c"),
    ];
    for (input, expected) in cases {
        let canonical = join_keypath(&split_keypath(input).unwrap());
        assert_eq!(canonical, expected, "input: {input}");
    }
}

#[test]
fn quoted_members_keep_dots_as_part_of_the_key() {
    let segments = split_keypath("config[\"a.b\"].value").unwrap();
    assert_eq!(segments, vec!["config", "a.b", "value"]);
    assert_eq!(join_keypath(&segments), "config.a\\.b.value");
    assert_eq!(split_keypath(&join_keypath(&segments)).unwrap(), segments);
}

#[test]
fn malformed_keypaths_report_positions() {
    assert_eq!(
        split_keypath("a.b..c"),
        Err(KeypathError::EmptySegment { position: 4 })
    );
    assert_eq!(
        split_keypath("list[3"),
        Err(KeypathError::UnterminatedBracket { position: 4 })
    );
    assert_eq!(
        split_keypath("x]"),
        Err(KeypathError::UnexpectedCharacter {
            position: 1,
            found: ']'
        })
    );
}

#[test]
fn oversized_keypaths_are_rejected() {
    let deep = vec!["k"; MAX_DEPTH + 1].join(".");
    assert_eq!(
        split_keypath(&deep),
        Err(KeypathError::TooDeep { depth: MAX_DEPTH + 1 })
    );
    assert!(matches!(
        split_keypath(&"x".repeat(4096)),
        Err(KeypathError::TooLong { length: 4096 })
    ));
}

#[test]
fn wildcard_patterns_relate_to_ancestors_and_descendants() {
    let pattern = split_keypath("items.*").unwrap();
    assert!(is_related(&pattern, &split_keypath("items.length").unwrap()));
    assert!(is_related(&pattern, &split_keypath("items").unwrap()));
    assert!(is_related(&pattern, &split_keypath("items.1.name").unwrap()));
    assert!(!is_related(&pattern, &split_keypath("other.1").unwrap()));
}

proptest! {
    #[test]
    fn joined_segments_split_back_to_the_same_segments(
        segments in prop::collection::vec("[a-z0-9.\\[\\]\\\\]{1,6}", 0..6)
    ) {
        let joined = join_keypath(&segments);
        prop_assert_eq!(split_keypath(&joined).unwrap(), segments);
    }
}
