//! Derivation of API names from storage names
//!
//! Handles the common English singular forms needed to turn a table name
//! ("categories") into a type name ("Category").

/// Convert a plural noun to its singular form
///
/// # Examples
///
/// ```
/// use relgraph::core::naming::singularize;
///
/// assert_eq!(singularize("users"), "user");
/// assert_eq!(singularize("categories"), "category");
/// assert_eq!(singularize("addresses"), "address");
/// ```
pub fn singularize(plural: &str) -> String {
    match plural {
        "" => String::new(),
        s if s.ends_with("ies") && s.len() > 3 => format!("{}y", &s[..s.len() - 3]),
        s if s.len() > 3
            && (s.ends_with("sses")
                || s.ends_with("shes")
                || s.ends_with("ches")
                || s.ends_with("xes")
                || s.ends_with("zes")) =>
        {
            s[..s.len() - 2].to_string()
        }
        s if s.ends_with("ss") || s.ends_with("us") || s.ends_with("is") => s.to_string(),
        s if s.ends_with('s') && s.len() > 1 => s[..s.len() - 1].to_string(),
        s => s.to_string(),
    }
}

/// Convert snake_case to PascalCase
pub fn pascal_case(s: &str) -> String {
    s.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Output type name for a table: PascalCase of the singular of the last word
///
/// `blog_posts` becomes `BlogPost`.
pub fn type_name_for_table(table: &str) -> String {
    match table.rsplit_once('_') {
        Some((head, last)) => pascal_case(&format!("{}_{}", head, singularize(last))),
        None => pascal_case(&singularize(table)),
    }
}

/// Default connect-input field for a unique index
pub fn unique_index_field(columns: &[String]) -> String {
    format!("by_{}", columns.join("_and_"))
}

/// Convert camelCase to snake_case
pub fn camel_to_snake(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(ch.to_ascii_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("companies"), "company");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("tags"), "tag");
        assert_eq!(singularize(""), "");
    }

    #[test]
    fn test_type_name_for_table() {
        assert_eq!(type_name_for_table("users"), "User");
        assert_eq!(type_name_for_table("post_tags"), "PostTag");
        assert_eq!(type_name_for_table("audit_log"), "AuditLog");
        assert_eq!(type_name_for_table("categories"), "Category");
    }

    #[test]
    fn test_unique_index_field() {
        assert_eq!(unique_index_field(&["email".to_string()]), "by_email");
        assert_eq!(
            unique_index_field(&["org_id".to_string(), "slug".to_string()]),
            "by_org_id_and_slug"
        );
    }

    #[test]
    fn test_camel_to_snake() {
        assert_eq!(camel_to_snake("authorId"), "author_id");
        assert_eq!(camel_to_snake("title"), "title");
    }
}
