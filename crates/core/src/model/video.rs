use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{QuizId, VideoId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VideoError {
    #[error("video title cannot be empty")]
    EmptyTitle,

    #[error("video order must be >= 1")]
    InvalidOrder,
}

//
// ─── VIDEO ─────────────────────────────────────────────────────────────────────
//

/// A catalog video. The core only ever reads these.
///
/// `order` is a unique rank across the catalog. Ranks need not be contiguous;
/// gating only looks at which published video sorts immediately before another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    id: VideoId,
    title: String,
    order: u32,
    is_published: bool,
    duration_secs: u32,
    quiz_id: Option<QuizId>,
    created_at: DateTime<Utc>,
}

impl Video {
    /// Creates an unpublished video without a quiz.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::EmptyTitle` for a blank title and
    /// `VideoError::InvalidOrder` for an order of zero.
    pub fn new(
        id: VideoId,
        title: impl Into<String>,
        order: u32,
        duration_secs: u32,
        created_at: DateTime<Utc>,
    ) -> Result<Self, VideoError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(VideoError::EmptyTitle);
        }
        if order == 0 {
            return Err(VideoError::InvalidOrder);
        }

        Ok(Self {
            id,
            title: title.trim().to_owned(),
            order,
            is_published: false,
            duration_secs,
            quiz_id: None,
            created_at,
        })
    }

    /// Rehydrate a video from storage.
    ///
    /// # Errors
    ///
    /// Same validation as [`Video::new`].
    pub fn from_persisted(
        id: VideoId,
        title: impl Into<String>,
        order: u32,
        is_published: bool,
        duration_secs: u32,
        quiz_id: Option<QuizId>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, VideoError> {
        let mut video = Self::new(id, title, order, duration_secs, created_at)?;
        video.is_published = is_published;
        video.quiz_id = quiz_id;
        Ok(video)
    }

    #[must_use]
    pub fn id(&self) -> VideoId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.is_published
    }

    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// Reverse pointer to the video's quiz, kept in sync by catalog maintenance.
    #[must_use]
    pub fn quiz_id(&self) -> Option<QuizId> {
        self.quiz_id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_published(&mut self, published: bool) {
        self.is_published = published;
    }

    pub fn set_quiz(&mut self, quiz_id: Option<QuizId>) {
        self.quiz_id = quiz_id;
    }

    /// # Errors
    ///
    /// Returns `VideoError::EmptyTitle` for a blank title.
    pub fn rename(&mut self, title: impl Into<String>) -> Result<(), VideoError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(VideoError::EmptyTitle);
        }
        self.title = title.trim().to_owned();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `VideoError::InvalidOrder` for an order of zero.
    pub fn reorder(&mut self, order: u32) -> Result<(), VideoError> {
        if order == 0 {
            return Err(VideoError::InvalidOrder);
        }
        self.order = order;
        Ok(())
    }

    pub fn set_duration(&mut self, duration_secs: u32) {
        self.duration_secs = duration_secs;
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn new_video_starts_unpublished_without_quiz() {
        let video = Video::new(VideoId::new(1), "  Intro ", 1, 300, fixed_now()).unwrap();
        assert_eq!(video.title(), "Intro");
        assert!(!video.is_published());
        assert_eq!(video.quiz_id(), None);
    }

    #[test]
    fn rejects_blank_title_and_zero_order() {
        let err = Video::new(VideoId::new(1), "  ", 1, 300, fixed_now()).unwrap_err();
        assert_eq!(err, VideoError::EmptyTitle);

        let err = Video::new(VideoId::new(1), "Intro", 0, 300, fixed_now()).unwrap_err();
        assert_eq!(err, VideoError::InvalidOrder);
    }
}
