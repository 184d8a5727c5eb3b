// Differential-drive move table
// Maps each command direction to the wheel pairs it drives and the encoder
// that decides when the move is finished.

use crate::encoder::Side;
use crate::messages::Direction;

/// One motor and its forward/reverse drive terminals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelPair {
    Left,
    Right,
}

impl WheelPair {
    pub const ALL: [WheelPair; 2] = [Self::Left, Self::Right];
}

/// Rotational sense a pair is driven in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Forward,
    Reverse,
}

/// Parameters of one drive-until-target move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePlan {
    pub driven: &'static [(WheelPair, Sense)],
    pub feedback: Side,
}

// Up/Down drive both pairs but only watch the left encoder
const UP: MovePlan = MovePlan {
    driven: &[(WheelPair::Left, Sense::Forward), (WheelPair::Right, Sense::Forward)],
    feedback: Side::Left,
};
const DOWN: MovePlan = MovePlan {
    driven: &[(WheelPair::Left, Sense::Reverse), (WheelPair::Right, Sense::Reverse)],
    feedback: Side::Left,
};
const LEFT: MovePlan = MovePlan {
    driven: &[(WheelPair::Right, Sense::Forward)],
    feedback: Side::Right,
};
const RIGHT: MovePlan = MovePlan {
    driven: &[(WheelPair::Left, Sense::Forward)],
    feedback: Side::Left,
};

/// Look up the move plan for a direction
pub fn plan_for(direction: Direction) -> MovePlan {
    match direction {
        Direction::Up => UP,
        Direction::Down => DOWN,
        Direction::Left => LEFT,
        Direction::Right => RIGHT,
    }
}
