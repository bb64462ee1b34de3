use crate::model::{DailyItinerary, TimeBlock};

/// The canonical time blocks of a day, in schedule order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Breakfast,
    Morning,
    Lunch,
    Afternoon,
    Dinner,
    Evening,
    Hotel,
}

impl BlockType {
    pub const ALL: [BlockType; 7] = [
        BlockType::Breakfast,
        BlockType::Morning,
        BlockType::Lunch,
        BlockType::Afternoon,
        BlockType::Dinner,
        BlockType::Evening,
        BlockType::Hotel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Breakfast => "breakfast",
            BlockType::Morning => "morning",
            BlockType::Lunch => "lunch",
            BlockType::Afternoon => "afternoon",
            BlockType::Dinner => "dinner",
            BlockType::Evening => "evening",
            BlockType::Hotel => "hotel",
        }
    }

    /// Default display range used when a day has to be rebuilt.
    pub fn default_range(&self) -> &'static str {
        match self {
            BlockType::Breakfast => "07:00 - 09:00",
            BlockType::Morning => "09:00 - 12:00",
            BlockType::Lunch => "12:00 - 14:00",
            BlockType::Afternoon => "14:00 - 18:00",
            BlockType::Dinner => "18:00 - 20:00",
            BlockType::Evening => "20:00 - 22:00",
            BlockType::Hotel => "22:00 - 07:00",
        }
    }
}

/// Seven empty blocks covering a whole day.
pub fn skeleton() -> Vec<TimeBlock> {
    BlockType::ALL
        .iter()
        .map(|kind| TimeBlock {
            block_type: kind.as_str().to_string(),
            time_range: kind.default_range().to_string(),
            ..TimeBlock::default()
        })
        .collect()
}

/// Days without blocks get the skeleton. Days with any block, including ones
/// tagged outside the canonical set, are returned unchanged.
pub fn normalize_days(days: Vec<DailyItinerary>) -> Vec<DailyItinerary> {
    days.into_iter()
        .map(|mut day| {
            if day.blocks.is_empty() {
                day.blocks = skeleton();
            }
            day
        })
        .collect()
}
