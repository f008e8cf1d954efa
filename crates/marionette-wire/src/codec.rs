//! Snapshot codec
//!
//! Payload layout after the fixed header:
//! - Byte 0: Flags (bit 0 = face section present)
//! - Byte 1: Joint count, must equal the level's joint count
//! - Root transform: 7 x f32 (position xyz, rotation xyzw)
//! - Joint transforms: 7 x f32 each, in `Joint::for_level` order
//! - Face section (if flagged): channel count u8, then count x f32
//!
//! All multi-byte values are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::{Quat, Vec3};
use marionette_core::{DetailLevel, MalformedReason, MarionetteResult, MotionTime};
use marionette_skeleton::{
    FaceWeights, Joint, JointTransform, SkeletonSample, SkeletonState, MAX_FACE_CHANNELS,
};

use crate::{Snapshot, WireHeader, WIRE_HEADER_SIZE};

/// Flag bit: face section follows the joints
pub const FLAG_FACE_PRESENT: u8 = 0x01;

const KNOWN_FLAGS: u8 = FLAG_FACE_PRESENT;

/// Bytes per encoded transform
pub const TRANSFORM_SIZE: usize = 7 * 4;

/// Flags + joint count
const PAYLOAD_PREFIX_SIZE: usize = 2;

/// Stateless encoder/decoder for snapshot packets
pub struct SnapshotCodec;

impl SnapshotCodec {
    /// Encode the subset of `state` carried at `level`
    pub fn encode(state: &SkeletonState, level: DetailLevel, timestamp: MotionTime) -> Bytes {
        Self::encode_snapshot(&Snapshot::capture(state, level, timestamp))
    }

    /// Encode an already captured snapshot
    pub fn encode_snapshot(snapshot: &Snapshot) -> Bytes {
        let sample = snapshot.sample();
        let face = sample.face();
        let face_channels = face.map_or(0, |f| f.len().min(MAX_FACE_CHANNELS));

        let mut buf = BytesMut::with_capacity(Self::encoded_len(
            sample.level(),
            face.map(|_| face_channels),
        ));

        WireHeader::new(sample.level(), snapshot.timestamp()).serialize(&mut buf);

        let flags = if face.is_some() { FLAG_FACE_PRESENT } else { 0 };
        buf.put_u8(flags);
        buf.put_u8(sample.joint_count() as u8);

        put_transform(&mut buf, sample.root());
        for (_, transform) in sample.joints() {
            put_transform(&mut buf, transform);
        }

        if let Some(face) = face {
            buf.put_u8(face_channels as u8);
            for weight in &face.weights()[..face_channels] {
                buf.put_f32_le(*weight);
            }
        }

        buf.freeze()
    }

    /// Decode a packet into a new snapshot
    ///
    /// Validates the whole packet before building anything, so a
    /// malformed packet never yields a partial pose.
    pub fn decode(data: &[u8]) -> MarionetteResult<Snapshot> {
        let header = WireHeader::parse(data)?;
        let level = header.detail_level;
        let mut buf = &data[WIRE_HEADER_SIZE..];

        ensure_remaining(buf, PAYLOAD_PREFIX_SIZE, data.len())?;
        let flags = buf.get_u8();
        let joint_count = buf.get_u8() as usize;

        if flags & !KNOWN_FLAGS != 0 {
            return Err(MalformedReason::UnexpectedSection("flags").into());
        }
        let face_present = flags & FLAG_FACE_PRESENT != 0;
        if face_present && !level.includes_face() {
            return Err(MalformedReason::UnexpectedSection("face").into());
        }

        let expected_joints = Joint::for_level(level).len();
        if joint_count != expected_joints {
            return Err(MalformedReason::JointCountMismatch {
                expected: expected_joints,
                actual: joint_count,
            }
            .into());
        }

        ensure_remaining(buf, (1 + joint_count) * TRANSFORM_SIZE, data.len())?;
        let root = get_transform(&mut buf)?;
        let mut joints = Vec::with_capacity(joint_count);
        for _ in 0..joint_count {
            joints.push(get_transform(&mut buf)?);
        }

        let face = if face_present {
            ensure_remaining(buf, 1, data.len())?;
            let channels = buf.get_u8() as usize;
            ensure_remaining(buf, channels * 4, data.len())?;
            let mut weights = Vec::with_capacity(channels);
            for _ in 0..channels {
                let w = buf.get_f32_le();
                if !w.is_finite() {
                    return Err(MalformedReason::NonFinite("face weight").into());
                }
                weights.push(w);
            }
            Some(FaceWeights::from_weights(weights))
        } else {
            None
        };

        if buf.has_remaining() {
            return Err(MalformedReason::TrailingBytes(buf.remaining()).into());
        }

        let sample = SkeletonSample::new(level, root, joints, face).ok_or(
            MalformedReason::JointCountMismatch {
                expected: expected_joints,
                actual: joint_count,
            },
        )?;

        Ok(Snapshot::new(header.timestamp, sample))
    }

    /// Exact packet size for a level and optional face channel count
    pub fn encoded_len(level: DetailLevel, face_channels: Option<usize>) -> usize {
        let joints = Joint::for_level(level).len();
        let face = face_channels.map_or(0, |n| 1 + n.min(MAX_FACE_CHANNELS) * 4);
        WIRE_HEADER_SIZE + PAYLOAD_PREFIX_SIZE + (1 + joints) * TRANSFORM_SIZE + face
    }
}

fn ensure_remaining(buf: &[u8], needed: usize, total: usize) -> MarionetteResult<()> {
    if buf.len() < needed {
        return Err(MalformedReason::Truncated {
            expected: total - buf.len() + needed,
            actual: total,
        }
        .into());
    }
    Ok(())
}

fn put_transform(buf: &mut BytesMut, transform: &JointTransform) {
    let p = transform.position;
    let r = transform.rotation;
    for v in [p.x, p.y, p.z, r.x, r.y, r.z, r.w] {
        buf.put_f32_le(v);
    }
}

fn get_transform(buf: &mut &[u8]) -> MarionetteResult<JointTransform> {
    let mut v = [0f32; 7];
    for slot in v.iter_mut() {
        *slot = buf.get_f32_le();
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(MalformedReason::NonFinite("transform").into());
    }
    Ok(JointTransform::new(
        Vec3::new(v[0], v[1], v[2]),
        Quat::from_xyzw(v[3], v[4], v[5], v[6]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_core::MarionetteError;
    use proptest::prelude::*;

    fn posed_state() -> SkeletonState {
        let mut state = SkeletonState::rest_pose_with_face(8);
        state.root = JointTransform::from_position(Vec3::new(1.0, 0.0, -2.0));
        state.set_joint(
            Joint::LeftHand,
            JointTransform::new(Vec3::new(-0.4, 1.1, 0.3), Quat::from_rotation_y(0.5)),
        );
        state.set_joint(
            Joint::LeftKnee,
            JointTransform::new(Vec3::new(0.0, -0.45, 0.1), Quat::from_rotation_x(0.3)),
        );
        if let Some(face) = state.face.as_mut() {
            face.set(3, 0.75);
        }
        state
    }

    fn malformed(result: MarionetteResult<Snapshot>) -> MalformedReason {
        match result {
            Err(MarionetteError::MalformedPacket(reason)) => reason,
            other => panic!("expected malformed packet, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_every_level() {
        let state = posed_state();
        let ts = MotionTime::from_millis(1500);

        for &level in DetailLevel::all() {
            let packet = SnapshotCodec::encode(&state, level, ts);
            let snapshot = SnapshotCodec::decode(&packet).unwrap();

            assert_eq!(snapshot.timestamp(), ts);
            assert_eq!(snapshot.level(), level);
            assert_eq!(snapshot.sample(), &state.sample(level));
        }
    }

    #[test]
    fn test_bone_only_omits_excluded_joints() {
        let state = posed_state();
        let packet = SnapshotCodec::encode(&state, DetailLevel::BoneOnly, MotionTime::ZERO);
        let snapshot = SnapshotCodec::decode(&packet).unwrap();

        assert!(snapshot.sample().joint(Joint::LeftHand).is_some());
        assert!(snapshot.sample().joint(Joint::LeftKnee).is_none());
        assert!(snapshot.sample().face().is_none());
    }

    #[test]
    fn test_face_level_without_face_rig() {
        let state = SkeletonState::rest_pose();
        let packet = SnapshotCodec::encode(&state, DetailLevel::FullBoneFace, MotionTime::ZERO);

        assert_eq!(packet[WIRE_HEADER_SIZE] & FLAG_FACE_PRESENT, 0);
        assert_eq!(
            packet.len(),
            SnapshotCodec::encoded_len(DetailLevel::FullBoneFace, None)
        );

        let snapshot = SnapshotCodec::decode(&packet).unwrap();
        assert!(snapshot.sample().face().is_none());
    }

    #[test]
    fn test_encoded_len_matches() {
        let state = posed_state();
        for &level in DetailLevel::all() {
            let packet = SnapshotCodec::encode(&state, level, MotionTime::ZERO);
            let face = level.includes_face().then_some(8);
            assert_eq!(packet.len(), SnapshotCodec::encoded_len(level, face));
        }
    }

    #[test]
    fn test_truncated_rejected() {
        let packet = SnapshotCodec::encode(&posed_state(), DetailLevel::FullBone, MotionTime::ZERO);
        let cut = &packet[..packet.len() - 3];

        assert!(matches!(
            malformed(SnapshotCodec::decode(cut)),
            MalformedReason::Truncated { .. }
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut packet =
            SnapshotCodec::encode(&posed_state(), DetailLevel::BoneOnly, MotionTime::ZERO).to_vec();
        packet.extend_from_slice(&[0, 0]);

        assert_eq!(
            malformed(SnapshotCodec::decode(&packet)),
            MalformedReason::TrailingBytes(2)
        );
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut packet =
            SnapshotCodec::encode(&posed_state(), DetailLevel::FullBone, MotionTime::ZERO).to_vec();
        packet[0] = 9;

        assert_eq!(
            malformed(SnapshotCodec::decode(&packet)),
            MalformedReason::UnknownVersion(9)
        );
    }

    #[test]
    fn test_joint_count_mismatch_rejected() {
        let mut packet =
            SnapshotCodec::encode(&posed_state(), DetailLevel::FullBone, MotionTime::ZERO).to_vec();
        packet[WIRE_HEADER_SIZE + 1] = 3;

        assert!(matches!(
            malformed(SnapshotCodec::decode(&packet)),
            MalformedReason::JointCountMismatch { actual: 3, .. }
        ));
    }

    #[test]
    fn test_face_flag_on_faceless_level_rejected() {
        let mut packet =
            SnapshotCodec::encode(&posed_state(), DetailLevel::FullBone, MotionTime::ZERO).to_vec();
        packet[WIRE_HEADER_SIZE] = FLAG_FACE_PRESENT;

        assert_eq!(
            malformed(SnapshotCodec::decode(&packet)),
            MalformedReason::UnexpectedSection("face")
        );
    }

    #[test]
    fn test_nan_transform_rejected() {
        let mut packet =
            SnapshotCodec::encode(&posed_state(), DetailLevel::BoneOnly, MotionTime::ZERO).to_vec();
        let root_x = WIRE_HEADER_SIZE + PAYLOAD_PREFIX_SIZE;
        packet[root_x..root_x + 4].copy_from_slice(&f32::NAN.to_le_bytes());

        assert!(matches!(
            malformed(SnapshotCodec::decode(&packet)),
            MalformedReason::NonFinite(_)
        ));
    }

    fn arb_transform() -> impl Strategy<Value = JointTransform> {
        (
            proptest::array::uniform3(-50.0f32..50.0),
            proptest::array::uniform4(-1.0f32..1.0),
        )
            .prop_map(|(p, r)| {
                JointTransform::new(
                    Vec3::from_array(p),
                    Quat::from_xyzw(r[0], r[1], r[2], r[3]),
                )
            })
    }

    fn arb_state() -> impl Strategy<Value = SkeletonState> {
        (
            arb_transform(),
            proptest::collection::vec(arb_transform(), Joint::all().len()),
            proptest::option::of(proptest::collection::vec(0.0f32..=1.0, 0..64)),
        )
            .prop_map(|(root, joints, face)| {
                let mut state = SkeletonState::rest_pose();
                state.root = root;
                for (&joint, transform) in Joint::all().iter().zip(joints) {
                    state.set_joint(joint, transform);
                }
                state.face = face.map(FaceWeights::from_weights);
                state
            })
    }

    proptest! {
        #[test]
        fn prop_roundtrip_preserves_sample(
            state in arb_state(),
            level_index in 0usize..DetailLevel::all().len(),
            micros in 0i64..10_000_000_000_000,
        ) {
            let level = DetailLevel::all()[level_index];
            let ts = MotionTime::from_micros(micros);
            let packet = SnapshotCodec::encode(&state, level, ts);
            let snapshot = SnapshotCodec::decode(&packet).unwrap();

            prop_assert_eq!(snapshot.timestamp(), ts);
            prop_assert_eq!(snapshot.level(), level);
            prop_assert_eq!(snapshot.sample(), &state.sample(level));
            for &joint in Joint::all() {
                let decoded = snapshot.sample().joint(joint);
                if joint.included_in(level) {
                    prop_assert_eq!(decoded, state.joint(joint));
                } else {
                    prop_assert!(decoded.is_none());
                }
            }
            if !level.includes_face() {
                prop_assert!(snapshot.sample().face().is_none());
            }
        }

        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..900)) {
            let _ = SnapshotCodec::decode(&data);
        }

        #[test]
        fn prop_corrupted_byte_never_panics(index in 0usize..400, value in any::<u8>()) {
            let mut packet = SnapshotCodec::encode(
                &posed_state(),
                DetailLevel::FullBoneFace,
                MotionTime::from_millis(20),
            )
            .to_vec();
            let index = index % packet.len();
            packet[index] = value;
            if let Ok(snapshot) = SnapshotCodec::decode(&packet) {
                prop_assert!(snapshot.sample().is_finite());
            }
        }
    }
}
