//! CSV header normalization for merged bulk exports.
//!
//! Salesforce column names come back as API names (`Account__r.Name`,
//! `Region__c`). Downstream loaders want flat lowercase identifiers, so
//! the header line of the first results page is rewritten field by
//! field, in this order:
//!
//! 1. lowercase
//! 2. strip a trailing `__c` / `__r` from each dot-separated path segment
//! 3. collapse a field that stripping left empty (or as a bare `_c`) to ""
//! 4. replace path dots with underscores
//!
//! Markers inside a name are kept, so namespaced fields such as
//! `npsp__Contact__c` become `npsp__contact`.
//!
//! The passes repeat until the line stops changing, which makes the
//! function idempotent even for inputs where step 4 produces a new
//! suffix (e.g. `a._c` becomes `a__c`).

const CUSTOM_SUFFIXES: &[&str] = &["__c", "__r"];

/// Normalizes a raw CSV header line (without its line terminator).
///
/// Field quoting is preserved: `"Account__c.Name__r"` becomes
/// `"account_name"`.
pub fn normalize_header(raw: &str) -> String {
    let mut current = normalize_once(raw);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_once(line: &str) -> String {
    line.split(',')
        .map(normalize_field)
        .collect::<Vec<_>>()
        .join(",")
}

fn normalize_field(field: &str) -> String {
    let (open, name, close) = split_quotes(field);

    let lowered = name.to_lowercase();
    let stripped = lowered
        .split('.')
        .map(strip_custom_suffix)
        .collect::<Vec<_>>()
        .join(".");
    let collapsed = if stripped != lowered && (stripped.is_empty() || stripped == "_c") {
        String::new()
    } else {
        stripped
    };
    let flattened = collapsed.replace('.', "_");

    format!("{}{}{}", open, flattened, close)
}

/// Splits a field into its surrounding double quotes and the name inside.
fn split_quotes(field: &str) -> (&str, &str, &str) {
    if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
        ("\"", &field[1..field.len() - 1], "\"")
    } else {
        ("", field, "")
    }
}

/// Removes trailing `__c` / `__r` markers from one path segment.
fn strip_custom_suffix(segment: &str) -> &str {
    let mut out = segment;
    while let Some(rest) = CUSTOM_SUFFIXES
        .iter()
        .find_map(|suffix| out.strip_suffix(suffix))
    {
        out = rest;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_object_relationship_is_flattened() {
        assert_eq!(normalize_header("Account__c.Name__r"), "account_name");
    }

    #[test]
    fn test_standard_fields_are_lowercased() {
        assert_eq!(normalize_header("Id,Name,CreatedDate"), "id,name,createddate");
    }

    #[test]
    fn test_relationship_paths_become_underscores() {
        assert_eq!(
            normalize_header("Id,Owner.Name,Account__r.Parent__r.Region__c"),
            "id,owner_name,account_parent_region"
        );
    }

    #[test]
    fn test_quoted_fields_keep_their_quotes() {
        assert_eq!(
            normalize_header(r#""Id","Account__r.Name","Amount__c""#),
            r#""id","account_name","amount""#
        );
    }

    #[test]
    fn test_namespaced_fields_keep_inner_markers() {
        assert_eq!(normalize_header("npsp__Contact__c"), "npsp__contact");
        assert_eq!(normalize_header("Foo__Rate__c"), "foo__rate");
        assert_eq!(normalize_header("ns__Region__r.Name"), "ns__region_name");
        assert_eq!(
            normalize_header(r#""Id","npsp__Primary_Contact__r.npsp__Status__c""#),
            r#""id","npsp__primary_contact_npsp__status""#
        );
    }

    #[test]
    fn test_stacked_suffixes_are_all_stripped() {
        assert_eq!(normalize_header("Field__C__R"), "field");
    }

    #[test]
    fn test_fields_emptied_by_stripping_collapse() {
        assert_eq!(normalize_header("Id,__c,__r"), "id,,");
        assert_eq!(normalize_header(r#""Id","_c__c""#), r#""id","""#);
    }

    #[test]
    fn test_underscore_only_names_without_markers_are_kept() {
        assert_eq!(normalize_header("Id,_,__"), "id,_,__");
        assert_eq!(normalize_header("_c"), "_c");
    }

    #[test]
    fn test_empty_header_stays_empty() {
        assert_eq!(normalize_header(""), "");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let inputs = [
            "Account__c.Name__r",
            r#""Id","Owner.Name","Amount__c""#,
            "A._C,b____cc,Field__C__R",
            "x.__r.y,,___",
            "npsp__Contact__c,Foo__Rate__c,ns__Region__r.Name",
        ];

        for input in inputs {
            let once = normalize_header(input);
            let twice = normalize_header(&once);
            assert_eq!(once, twice, "not idempotent for input: {}", input);
        }
    }

    #[test]
    fn test_dot_that_forms_custom_suffix_is_stripped() {
        // "a._c" -> "a__c" after the dot pass, which the next pass strips.
        assert_eq!(normalize_header("A._C"), "a");
    }
}
