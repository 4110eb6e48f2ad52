use std::collections::HashSet;

/// Static channel/user allow-lists.
///
/// An empty list means unrestricted. There is no dynamic update path:
/// change the configuration and restart.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    channels: HashSet<String>,
    users: HashSet<String>,
}

impl AllowList {
    /// Parses comma-separated id lists; blank entries are ignored.
    pub fn from_env_lists(channels_csv: &str, users_csv: &str) -> Self {
        Self {
            channels: parse_csv_set(channels_csv),
            users: parse_csv_set(users_csv),
        }
    }

    /// Direct messages are always permitted; guild channels must be listed
    /// unless the channel list is empty.
    pub fn is_channel_allowed(&self, channel_id: &str, is_direct_message: bool) -> bool {
        if is_direct_message {
            return true;
        }
        if self.channels.is_empty() {
            return true;
        }
        let allowed = self.channels.contains(channel_id);
        if !allowed {
            tracing::debug!(channel_id, "channel not in allow-list; ignoring");
        }
        allowed
    }

    /// Bots are never permitted (prevents feedback loops); other users must
    /// be listed unless the user list is empty.
    pub fn is_user_allowed(&self, user_id: &str, is_bot: bool) -> bool {
        if is_bot {
            return false;
        }
        if self.users.is_empty() {
            return true;
        }
        let allowed = self.users.contains(user_id);
        if !allowed {
            tracing::debug!(user_id, "user not in allow-list; ignoring");
        }
        allowed
    }
}

fn parse_csv_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_allow_everything_except_bots() {
        let allow_list = AllowList::from_env_lists("", "");
        assert!(allow_list.is_channel_allowed("123", false));
        assert!(allow_list.is_user_allowed("456", false));
        assert!(!allow_list.is_user_allowed("456", true));
    }

    #[test]
    fn listed_channels_restrict_unlisted_ones() {
        let allow_list = AllowList::from_env_lists("100, 200", "");
        assert!(allow_list.is_channel_allowed("100", false));
        assert!(allow_list.is_channel_allowed("200", false));
        assert!(!allow_list.is_channel_allowed("300", false));
    }

    #[test]
    fn direct_messages_bypass_the_channel_list() {
        let allow_list = AllowList::from_env_lists("100", "");
        assert!(allow_list.is_channel_allowed("999", true));
    }

    #[test]
    fn listed_users_restrict_unlisted_ones() {
        let allow_list = AllowList::from_env_lists("", "7,8");
        assert!(allow_list.is_user_allowed("7", false));
        assert!(!allow_list.is_user_allowed("9", false));
    }

    #[test]
    fn bots_are_rejected_even_when_listed() {
        let allow_list = AllowList::from_env_lists("", "7");
        assert!(!allow_list.is_user_allowed("7", true));
    }

    #[test]
    fn csv_parsing_skips_blank_entries() {
        let allow_list = AllowList::from_env_lists(" , 100,, ", "");
        assert!(allow_list.is_channel_allowed("100", false));
        assert!(!allow_list.is_channel_allowed("", false));
    }
}
