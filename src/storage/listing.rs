//! Paging and delimiter emulation for drivers that list from a sorted
//! in-process view (memory, local files) / 本地分页与分隔符模拟

use super::{ListPage, ListQuery, ObjectMetadata};

/// Build one page from entries sorted by key.
///
/// The page token is the last key (or common prefix) handed out, so a
/// listing can be restarted from scratch but a token from another
/// listing is simply a lower bound.
pub fn paginate<I>(entries: I, query: &ListQuery) -> ListPage
where
    I: IntoIterator<Item = ObjectMetadata>,
{
    let page_size = query.page_size.max(1);
    let delimiter = query.delimiter.as_deref().filter(|d| !d.is_empty());
    let token = query.page_token.as_deref();

    let mut objects: Vec<ObjectMetadata> = Vec::new();
    let mut next_page_token = None;

    for entry in entries {
        if !entry.key.starts_with(&query.prefix) {
            continue;
        }
        if let Some(token) = token {
            if entry.key.as_str() <= token {
                continue;
            }
            // keys folded into a common prefix on an earlier page
            if delimiter.map_or(false, |d| token.ends_with(d)) && entry.key.starts_with(token) {
                continue;
            }
        }

        let item = match delimiter {
            Some(d) => match common_prefix(&entry.key, &query.prefix, d) {
                Some(prefix) => {
                    if objects.last().map_or(false, |last| last.is_dir && last.key == prefix) {
                        continue;
                    }
                    ObjectMetadata::directory(prefix)
                }
                None => entry,
            },
            None => entry,
        };

        if objects.len() == page_size {
            next_page_token = objects.last().map(|o| o.key.clone());
            break;
        }
        objects.push(item);
    }

    ListPage {
        objects,
        next_page_token,
    }
}

/// `prefix + segment + delimiter` when the key continues past the delimiter
/// 计算公共前缀
pub fn common_prefix(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?;
    let pos = rest.find(delimiter)?;
    Some(format!("{}{}", prefix, &rest[..pos + delimiter.len()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: &[&str]) -> Vec<ObjectMetadata> {
        keys.iter().map(|k| ObjectMetadata::new(*k, 1)).collect()
    }

    fn keys(page: &ListPage) -> Vec<String> {
        page.objects.iter().map(|o| o.key.clone()).collect()
    }

    #[test]
    fn test_prefix_filter() {
        let query = ListQuery {
            prefix: "img/".into(),
            page_size: 10,
            ..Default::default()
        };
        let page = paginate(entries(&["a.txt", "img/1.png", "img/2.png", "z"]), &query);
        assert_eq!(keys(&page), vec!["img/1.png", "img/2.png"]);
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_pages_cover_everything_once() {
        let all = entries(&["a", "b", "c", "d", "e"]);
        let mut query = ListQuery {
            page_size: 2,
            ..Default::default()
        };
        let mut seen = Vec::new();
        loop {
            let page = paginate(all.clone(), &query);
            seen.extend(keys(&page));
            match page.next_page_token {
                Some(token) => query.page_token = Some(token),
                None => break,
            }
        }
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_delimiter_folds_directories() {
        let all = entries(&["dir/a", "dir/b", "dir/sub/c", "top", "zz/x"]);
        let query = ListQuery {
            delimiter: Some("/".into()),
            page_size: 10,
            ..Default::default()
        };
        let page = paginate(all.clone(), &query);
        assert_eq!(keys(&page), vec!["dir/", "top", "zz/"]);
        assert!(page.objects[0].is_dir);
        assert!(!page.objects[1].is_dir);

        let query = ListQuery {
            prefix: "dir/".into(),
            delimiter: Some("/".into()),
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(keys(&paginate(all, &query)), vec!["dir/a", "dir/b", "dir/sub/"]);
    }

    #[test]
    fn test_delimiter_paging_does_not_repeat_prefix() {
        let all = entries(&["a/1", "a/2", "a/3", "b"]);
        let query = ListQuery {
            delimiter: Some("/".into()),
            page_size: 1,
            ..Default::default()
        };
        let first = paginate(all.clone(), &query);
        assert_eq!(keys(&first), vec!["a/"]);
        let second = paginate(
            all,
            &ListQuery {
                page_token: first.next_page_token,
                ..query
            },
        );
        assert_eq!(keys(&second), vec!["b"]);
        assert!(second.next_page_token.is_none());
    }
}
