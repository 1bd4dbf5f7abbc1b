use std::collections::{HashMap, HashSet};

use crate::forum::Comment;

/// Floor of the root post.
pub const ROOT_FLOOR: u32 = 1;

/// A comment with the floor numbers derived for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEntry {
    pub comment: Comment,
    pub floor: u32,
    /// Floor of the quoted comment. `None` for top-level replies and for
    /// parents missing from the snapshot.
    pub parent_floor: Option<u32>,
}

impl ThreadEntry {
    pub fn id(&self) -> i64 {
        self.comment.id
    }
}

/// Numbers a fetched comment list.
///
/// Comments are ordered by `(created_at, id)` before numbering so that a
/// refetch returning the same comments in a different order keeps every floor.
pub fn number_comments(mut comments: Vec<Comment>) -> Vec<ThreadEntry> {
    let mut seen = HashSet::new();
    comments.retain(|comment| seen.insert(comment.id));
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let floors: HashMap<i64, u32> = comments
        .iter()
        .enumerate()
        .map(|(index, comment)| (comment.id, index as u32 + ROOT_FLOOR + 1))
        .collect();

    comments
        .into_iter()
        .map(|comment| {
            let floor = floors[&comment.id];
            let parent_floor = comment
                .parent_comment_id
                .and_then(|parent| floors.get(&parent).copied());
            ThreadEntry {
                comment,
                floor,
                parent_floor,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn comment(id: i64, parent: Option<i64>, minute: u32) -> Comment {
        Comment {
            id,
            post_id: 1,
            parent_comment_id: parent,
            content: format!("<p>{id}</p>"),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            commenter_id: 5,
            commenter: None,
            score: 0,
            my_vote: 0,
        }
    }

    #[test]
    fn floors_start_after_root_post() {
        let entries = number_comments(vec![comment(10, None, 0), comment(11, None, 1)]);
        let floors: Vec<u32> = entries.iter().map(|e| e.floor).collect();
        assert_eq!(floors, vec![2, 3]);
    }

    #[test]
    fn floors_survive_reordered_refetch() {
        let first = number_comments(vec![
            comment(1, None, 0),
            comment(2, Some(1), 1),
            comment(3, None, 2),
        ]);
        let second = number_comments(vec![
            comment(3, None, 2),
            comment(1, None, 0),
            comment(2, Some(1), 1),
        ]);
        assert_eq!(first, second);
    }

    #[test]
    fn same_timestamp_orders_by_id() {
        let entries = number_comments(vec![comment(9, None, 0), comment(4, None, 0)]);
        assert_eq!(entries[0].id(), 4);
        assert_eq!(entries[1].id(), 9);
    }

    #[test]
    fn parent_floor_resolves_within_snapshot() {
        let entries = number_comments(vec![
            comment(1, None, 0),
            comment(2, Some(1), 1),
            comment(3, Some(404), 2),
        ]);
        assert_eq!(entries[0].parent_floor, None);
        assert_eq!(entries[1].parent_floor, Some(2));
        assert_eq!(entries[2].parent_floor, None);
    }

    #[test]
    fn duplicate_ids_are_numbered_once() {
        let entries = number_comments(vec![comment(1, None, 0), comment(1, None, 0)]);
        assert_eq!(entries.len(), 1);
    }
}
