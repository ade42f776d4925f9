use super::types::{Change, ChangeType};

/// Whether a change should be fetched and reviewed: not a folder, not a
/// delete, and the path ends with one of `extensions` (case-insensitive).
pub(crate) fn is_reviewable(change: &Change, extensions: &[String]) -> bool {
    if change.item.is_folder || change.item.path.is_empty() {
        return false;
    }
    if ChangeType::parse(&change.change_type) == ChangeType::Delete {
        return false;
    }
    has_source_extension(&change.item.path, extensions)
}

pub fn has_source_extension(path: &str, extensions: &[String]) -> bool {
    let lower = path.to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devops::types::Item;

    fn change(path: &str, change_type: &str) -> Change {
        Change {
            item: Item {
                path: path.to_string(),
                url: format!("https://dev.azure.com/items{}", path),
                is_folder: false,
            },
            change_type: change_type.to_string(),
        }
    }

    fn cs() -> Vec<String> {
        vec![".cs".to_string()]
    }

    #[test]
    fn test_source_files_are_reviewable() {
        assert!(is_reviewable(&change("/src/Order.cs", "edit"), &cs()));
        assert!(is_reviewable(&change("/src/Order.CS", "add"), &cs()));
    }

    #[test]
    fn test_deleted_files_are_skipped() {
        assert!(!is_reviewable(&change("/src/Order.cs", "delete"), &cs()));
    }

    #[test]
    fn test_non_source_files_are_skipped() {
        assert!(!is_reviewable(&change("/README.md", "edit"), &cs()));
        assert!(!is_reviewable(&change("/src/App.csproj", "edit"), &cs()));
    }

    #[test]
    fn test_folders_are_skipped() {
        let mut c = change("/src/Orders.cs", "add");
        c.item.is_folder = true;
        assert!(!is_reviewable(&c, &cs()));
    }

    #[test]
    fn test_multiple_extensions() {
        let exts = vec![".cs".to_string(), ".razor".to_string()];
        assert!(has_source_extension("/Pages/Index.razor", &exts));
        assert!(!has_source_extension("/Pages/site.css", &exts));
    }
}
