//! Lead qualification funnel: stages, signals, and the board.

pub mod machine;
pub mod model;
pub mod signals;

pub use machine::{QualificationMachine, build_board, next_stage};
pub use model::{
    Board, BoardCard, ConversationEvent, QualifiedLead, Sentiment, SignalCategory, Stage,
    StageTransition, TransitionSource,
};
