//! Short, human-facing follow-ups for each detected emotion.

use serde::Serialize;

use crate::emotion::Emotion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Insight {
    pub emotion: Emotion,
    pub emoji: &'static str,
    pub suggestions: [&'static str; 3],
}

pub fn insight_for(emotion: Emotion) -> Insight {
    let (emoji, suggestions) = match emotion {
        Emotion::Happy => (
            "😄",
            [
                "Share your joy with someone you care about",
                "Plan something fun for yourself or others",
                "Journal about what made you happy today",
            ],
        ),
        Emotion::Sad => (
            "😢",
            [
                "Call a friend who makes you smile",
                "Go for a 10-minute walk outside",
                "Listen to calming or uplifting music",
            ],
        ),
        Emotion::Angry => (
            "😠",
            [
                "Try 5 minutes of deep breathing exercises",
                "Take a short break from what you're doing",
                "Write down what's bothering you",
            ],
        ),
        Emotion::Calm => (
            "😌",
            [
                "Maintain this energy by planning your day",
                "Practice mindfulness to enhance your peaceful state",
                "Tackle an important task that requires focus",
            ],
        ),
        Emotion::Fearful => (
            "😱",
            [
                "Talk to someone you trust about your concerns",
                "Write in a journal about what's making you fearful",
                "Practice grounding techniques",
            ],
        ),
        Emotion::Disgust => (
            "🤢",
            [
                "Create some physical distance from what's bothering you",
                "Cleanse your environment or personal space",
                "Redirect your attention to something pleasant",
            ],
        ),
        Emotion::Surprised => (
            "😲",
            [
                "Reflect on what surprised you and why",
                "Write down your thoughts about this unexpected situation",
                "Take a moment to process before making any decisions",
            ],
        ),
        Emotion::Neutral => (
            "😐",
            [
                "Check in with yourself about how your day is going",
                "Use this steady moment to organize your priorities",
                "Do something small that usually lifts your mood",
            ],
        ),
    };
    Insight {
        emotion,
        emoji,
        suggestions,
    }
}
