//! Sequential gating: a learner may open a video once the published video
//! ranked immediately before it has been completed.

use crate::model::{Role, Video, VideoId};

/// Why access was granted or refused. Kept structured so callers can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    AdminBypass,
    /// Lowest-ranked published video; always open.
    FirstVideo,
    PreviousCompleted { previous: VideoId },
    /// No published video ranks before this one (e.g. the first one was
    /// deleted). Fails open.
    NoPreviousVideo,
    Denied { previous: VideoId },
}

impl AccessDecision {
    #[must_use]
    pub fn is_granted(self) -> bool {
        !matches!(self, AccessDecision::Denied { .. })
    }
}

/// The published video ranked immediately before `video`, if any.
///
/// `published` does not need to be sorted.
#[must_use]
pub fn previous_video<'a>(video: &Video, published: &'a [Video]) -> Option<&'a Video> {
    published
        .iter()
        .filter(|v| v.is_published() && v.id() != video.id() && v.order() < video.order())
        .max_by_key(|v| v.order())
}

/// Decide whether a user with `role` and the given completed set may view `video`.
#[must_use]
pub fn evaluate(
    role: Role,
    video: &Video,
    published: &[Video],
    completed: &[VideoId],
) -> AccessDecision {
    if role == Role::Admin {
        return AccessDecision::AdminBypass;
    }

    let first_order = published
        .iter()
        .filter(|v| v.is_published())
        .map(Video::order)
        .min();
    if video.is_published() && first_order == Some(video.order()) {
        return AccessDecision::FirstVideo;
    }

    match previous_video(video, published) {
        None => AccessDecision::NoPreviousVideo,
        Some(prev) if completed.contains(&prev.id()) => AccessDecision::PreviousCompleted {
            previous: prev.id(),
        },
        Some(prev) => AccessDecision::Denied {
            previous: prev.id(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn video(id: u64, order: u32) -> Video {
        let mut v = Video::new(VideoId::new(id), format!("V{id}"), order, 120, fixed_now()).unwrap();
        v.set_published(true);
        v
    }

    fn catalog() -> Vec<Video> {
        // sparse, unsorted ranks
        vec![video(3, 30), video(1, 10), video(2, 20)]
    }

    #[test]
    fn first_video_is_always_open() {
        let videos = catalog();
        let d = evaluate(Role::Learner, &videos[1], &videos, &[]);
        assert_eq!(d, AccessDecision::FirstVideo);
        assert!(d.is_granted());
    }

    #[test]
    fn gating_follows_previous_completion() {
        let videos = catalog();
        let third = &videos[0];

        let d = evaluate(Role::Learner, third, &videos, &[VideoId::new(1)]);
        assert_eq!(
            d,
            AccessDecision::Denied {
                previous: VideoId::new(2)
            }
        );
        assert!(!d.is_granted());

        let d = evaluate(Role::Learner, third, &videos, &[VideoId::new(1), VideoId::new(2)]);
        assert!(d.is_granted());
    }

    #[test]
    fn completing_a_later_video_does_not_open_an_earlier_gap() {
        let videos = catalog();
        let second = &videos[2];
        let d = evaluate(Role::Learner, second, &videos, &[VideoId::new(3)]);
        assert!(!d.is_granted());
    }

    #[test]
    fn admin_bypasses_everything() {
        let videos = catalog();
        assert_eq!(
            evaluate(Role::Admin, &videos[0], &videos, &[]),
            AccessDecision::AdminBypass
        );
    }

    #[test]
    fn unpublished_predecessors_are_skipped() {
        let mut videos = catalog();
        videos[2].set_published(false);
        let d = evaluate(Role::Learner, &videos[0], &videos, &[VideoId::new(1)]);
        assert_eq!(
            d,
            AccessDecision::PreviousCompleted {
                previous: VideoId::new(1)
            }
        );
    }

    #[test]
    fn missing_predecessor_fails_open() {
        let videos = catalog();
        let orphan = Video::new(VideoId::new(9), "Early draft", 5, 60, fixed_now()).unwrap();
        assert_eq!(
            evaluate(Role::Learner, &orphan, &videos, &[]),
            AccessDecision::NoPreviousVideo
        );
    }
}
