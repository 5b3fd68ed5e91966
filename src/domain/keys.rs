//! Stable identities for the API's logical resources.

/// A logical resource: where it lives on the API and the cache key its
/// responses are stored under. Keys must not change between releases or
/// cached data from earlier sessions becomes unreachable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKey {
  Disciplines,
  Discipline { id: String },
  /// All topics, or only those of one discipline
  Topics { discipline: Option<String> },
  Topic { id: String },
  Assignments,
  Assignment { id: String },
  AssignmentsByTopic { topic: String },
  Achievements,
  UserStats,
  MySubmissions,
  UnviewedAchievements,
}

impl ResourceKey {
  pub fn cache_key(&self) -> String {
    match self {
      Self::Disciplines => "disciplines".to_string(),
      Self::Discipline { id } => format!("discipline_{}", id),
      Self::Topics { discipline: None } => "topics".to_string(),
      Self::Topics {
        discipline: Some(d),
      } => format!("topics_discipline_{}", d),
      Self::Topic { id } => format!("topic_{}", id),
      Self::Assignments => "assignments".to_string(),
      Self::Assignment { id } => format!("assignment_{}", id),
      Self::AssignmentsByTopic { topic } => format!("assignments_topic_{}", topic),
      Self::Achievements => "achievements".to_string(),
      Self::UserStats => "user_stats".to_string(),
      Self::MySubmissions => "my_submissions".to_string(),
      Self::UnviewedAchievements => "unviewed_achievements".to_string(),
    }
  }

  /// Path relative to the API base URL.
  pub fn path(&self) -> String {
    match self {
      Self::Disciplines => "disciplines/".to_string(),
      Self::Discipline { id } => format!("disciplines/{}", id),
      Self::Topics { discipline: None } => "topics/".to_string(),
      Self::Topics {
        discipline: Some(d),
      } => format!("topics/?discipline_id={}", d),
      Self::Topic { id } => format!("topics/{}", id),
      Self::Assignments => "assignments/".to_string(),
      Self::Assignment { id } => format!("assignments/{}", id),
      Self::AssignmentsByTopic { topic } => format!("assignments/topic/{}", topic),
      Self::Achievements => "achievements/".to_string(),
      Self::UserStats => "achievements/stats".to_string(),
      Self::MySubmissions => "submissions/my".to_string(),
      Self::UnviewedAchievements => "achievements/unviewed".to_string(),
    }
  }
}
