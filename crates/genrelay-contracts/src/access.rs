use std::collections::HashSet;

/// Blacklist/whitelist check. An empty whitelist admits everyone not blacklisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    blacklist: HashSet<String>,
    whitelist: HashSet<String>,
}

impl AccessList {
    pub fn new<B, W>(blacklist: B, whitelist: W) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
        W: IntoIterator,
        W::Item: Into<String>,
    {
        Self {
            blacklist: blacklist.into_iter().map(Into::into).collect(),
            whitelist: whitelist.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses comma-separated actor ids, ignoring blanks.
    pub fn from_csv(blacklist: &str, whitelist: &str) -> Self {
        Self::new(split_ids(blacklist), split_ids(whitelist))
    }

    pub fn is_allowed(&self, actor: &str) -> bool {
        if self.blacklist.contains(actor) {
            return false;
        }
        self.whitelist.is_empty() || self.whitelist.contains(actor)
    }
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_list_allows_everyone() {
        assert!(AccessList::default().is_allowed("anyone"));
    }

    #[test]
    fn blacklist_wins_over_whitelist() {
        let access = AccessList::from_csv("u1, u3", "u1,u2");
        assert!(!access.is_allowed("u1"));
        assert!(access.is_allowed("u2"));
        assert!(!access.is_allowed("u3"));
        assert!(!access.is_allowed("u4"));
    }
}
