//! Customer scope for one replace upload

use std::collections::BTreeSet;

use super::IngestError;
use crate::services::customer_name::normalize_customer_name;

/// Decide which customer scope a replace applies to.
///
/// An explicit non-blank name always wins. Otherwise the sheet's Customer
/// column decides: no values means an unscoped replace, one value is used,
/// several distinct values are rejected.
pub fn resolve_scope(
    explicit: Option<&str>,
    sheet_customers: &BTreeSet<String>,
) -> Result<Option<String>, IngestError> {
    if let Some(name) = normalize_customer_name(explicit) {
        return Ok(Some(name));
    }

    let mut values = sheet_customers.iter();
    match (values.next(), values.next()) {
        (None, _) => Ok(None),
        (Some(only), None) => Ok(normalize_customer_name(Some(only))),
        (Some(_), Some(_)) => Err(IngestError::MultipleCustomers {
            names: sheet_customers.iter().cloned().collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_explicit_name_wins_over_sheet() {
        let scope = resolve_scope(Some("vip customer"), &set(&["Routeware", "Acme"])).unwrap();
        assert_eq!(scope.as_deref(), Some("VIP"));
    }

    #[test]
    fn test_single_sheet_customer_is_normalized() {
        let scope = resolve_scope(None, &set(&["Infinite Electronics"])).unwrap();
        assert_eq!(scope.as_deref(), Some("Infinite"));
    }

    #[test]
    fn test_blank_explicit_falls_back_to_sheet() {
        let scope = resolve_scope(Some("   "), &set(&["Acme Corp"])).unwrap();
        assert_eq!(scope.as_deref(), Some("Acme Corp"));
    }

    #[test]
    fn test_no_customer_anywhere_is_unscoped() {
        assert_eq!(resolve_scope(None, &BTreeSet::new()).unwrap(), None);
    }

    #[test]
    fn test_several_sheet_customers_are_rejected() {
        let err = resolve_scope(None, &set(&["Acme", "Routeware"])).unwrap_err();
        match err {
            IngestError::MultipleCustomers { names } => {
                assert_eq!(names, vec!["Acme".to_string(), "Routeware".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_values_differing_only_in_case_count_as_distinct() {
        let result = resolve_scope(None, &set(&["acme", "Acme"]));
        assert!(matches!(result, Err(IngestError::MultipleCustomers { .. })));
    }
}
