//! Ball representations
//!
//! Two views of the same ball: the raw 20-byte C layout exchanged through
//! module memory, and the JSON form the physics module publishes via
//! `state()`.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// `struct ball { pos2 pos; float r; vec2 velocity; }` as laid out in module memory
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RawBall {
    pub pos: Vec2,
    pub r: f32,
    pub velocity: Vec2,
}

/// Size of one ball in module memory
pub const BALL_SIZE: usize = std::mem::size_of::<RawBall>();

impl RawBall {
    pub fn new(pos: Vec2, r: f32) -> Self {
        Self {
            pos,
            r,
            velocity: Vec2::ZERO,
        }
    }
}

/// Ball position in domain units (x normalized to width 1)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pos2 {
    pub x: f32,
    pub y: f32,
}

impl From<Pos2> for Vec2 {
    fn from(p: Pos2) -> Self {
        Vec2::new(p.x, p.y)
    }
}

impl From<Vec2> for Pos2 {
    fn from(v: Vec2) -> Self {
        Self { x: v.x, y: v.y }
    }
}

/// A ball as seen by the compositor
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Ball {
    pub pos: Pos2,
    pub r: f32,
}

impl Ball {
    pub fn new(x: f32, y: f32, r: f32) -> Self {
        Self {
            pos: Pos2 { x, y },
            r,
        }
    }
}

impl From<&RawBall> for Ball {
    fn from(raw: &RawBall) -> Self {
        Self {
            pos: raw.pos.into(),
            r: raw.r,
        }
    }
}

/// Byte length needed for `num_balls` balls
pub fn balls_byte_len(num_balls: usize) -> usize {
    num_balls * BALL_SIZE
}

/// Check that a `byte_len` buffer is whole balls and holds `num_balls`
pub fn check_ball_layout(byte_len: usize, num_balls: usize) -> HostResult<()> {
    if byte_len % BALL_SIZE != 0 || balls_byte_len(num_balls) > byte_len {
        return Err(HostError::BallLayoutMismatch {
            byte_len,
            num_balls,
        });
    }
    Ok(())
}

/// Decode raw ball bytes (alignment-agnostic)
pub fn decode_balls(bytes: &[u8]) -> HostResult<Vec<RawBall>> {
    check_ball_layout(bytes.len(), 0)?;
    Ok(bytes
        .chunks_exact(BALL_SIZE)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

pub fn encode_balls(balls: &[RawBall]) -> &[u8] {
    bytemuck::cast_slice(balls)
}

/// Published state: either a bare ball array or an object carrying one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StateBlob {
    Balls(Vec<Ball>),
    Object { balls: Vec<Ball> },
}

/// Parse the JSON the physics module writes behind `state()`
pub fn parse_state(json: &[u8]) -> HostResult<Vec<Ball>> {
    let blob: StateBlob = serde_json::from_slice(json)?;
    Ok(match blob {
        StateBlob::Balls(balls) => balls,
        StateBlob::Object { balls } => balls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_ball_is_five_floats() {
        assert_eq!(BALL_SIZE, 20);
        assert_eq!(std::mem::align_of::<RawBall>(), 4);
    }

    #[test]
    fn test_decode_misaligned_slice() {
        let balls = [
            RawBall::new(Vec2::new(0.25, 0.5), 0.01),
            RawBall {
                pos: Vec2::new(0.75, 0.1),
                r: 0.02,
                velocity: Vec2::new(0.0, -1.0),
            },
        ];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(encode_balls(&balls));

        let decoded = decode_balls(&bytes[1..]).unwrap();
        assert_eq!(decoded, balls);
    }

    #[test]
    fn test_layout_checks() {
        assert!(check_ball_layout(40, 2).is_ok());
        assert!(check_ball_layout(40, 1).is_ok());
        assert!(check_ball_layout(40, 3).is_err());
        assert!(check_ball_layout(41, 0).is_err());
        assert!(decode_balls(&[0u8; 19]).is_err());
    }

    #[test]
    fn test_parse_state_array_and_object() {
        let array = br#"[{"pos":{"x":0.5,"y":0.25},"r":0.01}]"#;
        let balls = parse_state(array).unwrap();
        assert_eq!(balls, vec![Ball::new(0.5, 0.25, 0.01)]);

        let object = br#"{"balls":[{"pos":{"x":0.1,"y":0.2},"r":0.03}],"num_steps_taken":7}"#;
        let balls = parse_state(object).unwrap();
        assert_eq!(balls, vec![Ball::new(0.1, 0.2, 0.03)]);

        assert!(matches!(
            parse_state(b"{\"pos\":1}"),
            Err(HostError::InvalidState(_))
        ));
    }
}
