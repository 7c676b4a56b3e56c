use serde::{Deserialize, Serialize};

/// COCO 17-keypoint layout used by YOLO pose models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;
}

/// Which arm a hand candidate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn wrist(self) -> KeypointIndex {
        match self {
            Side::Left => KeypointIndex::LeftWrist,
            Side::Right => KeypointIndex::RightWrist,
        }
    }

    pub fn elbow(self) -> KeypointIndex {
        match self {
            Side::Left => KeypointIndex::LeftElbow,
            Side::Right => KeypointIndex::RightElbow,
        }
    }

    pub fn shoulder(self) -> KeypointIndex {
        match self {
            Side::Left => KeypointIndex::LeftShoulder,
            Side::Right => KeypointIndex::RightShoulder,
        }
    }
}

/// Single keypoint in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Confidence score (0.0..=1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence.is_finite() && self.confidence >= threshold
    }
}

/// One detected person
#[derive(Debug, Clone, Default)]
pub struct Pose {
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
}

impl Pose {
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT]) -> Self {
        Self { keypoints }
    }

    /// Build from a slice of `[x, y, confidence]` triples; missing points stay at zero
    pub fn from_triples(triples: &[[f32; 3]]) -> Self {
        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        for (slot, [x, y, c]) in keypoints.iter_mut().zip(triples.iter()) {
            *slot = Keypoint::new(*x, *y, *c);
        }
        Self { keypoints }
    }

    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    pub fn set(&mut self, index: KeypointIndex, keypoint: Keypoint) {
        self.keypoints[index as usize] = keypoint;
    }

    /// Mean confidence of shoulder, elbow and wrist on one side
    pub fn arm_confidence(&self, side: Side) -> f32 {
        let sum = self.get(side.shoulder()).confidence
            + self.get(side.elbow()).confidence
            + self.get(side.wrist()).confidence;
        sum / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_triples_pads_missing_points() {
        let pose = Pose::from_triples(&[[1.0, 2.0, 0.9]]);
        assert_eq!(*pose.get(KeypointIndex::Nose), Keypoint::new(1.0, 2.0, 0.9));
        assert_eq!(pose.get(KeypointIndex::RightAnkle).confidence, 0.0);
    }

    #[test]
    fn test_arm_confidence() {
        let mut pose = Pose::default();
        pose.set(KeypointIndex::LeftShoulder, Keypoint::new(0.0, 0.0, 0.3));
        pose.set(KeypointIndex::LeftElbow, Keypoint::new(0.0, 0.0, 0.6));
        pose.set(KeypointIndex::LeftWrist, Keypoint::new(0.0, 0.0, 0.9));
        assert!((pose.arm_confidence(Side::Left) - 0.6).abs() < 1e-6);
        assert_eq!(pose.arm_confidence(Side::Right), 0.0);
    }
}
