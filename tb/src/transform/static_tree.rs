//! Fixed transform tree
//!
//! Edges are (parent, child) poses. Lookups walk the tree in either
//! direction, inverting edges as needed, and compose along the path.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::TransformProvider;
use crate::error::TransformError;
use crate::record::{Quaternion, Transform, Vector3};

/// Transform provider backed by a static set of frame relationships
#[derive(Default)]
pub struct StaticTransforms {
    /// frame -> [(neighbor, pose of neighbor in frame)]
    edges: RwLock<HashMap<String, Vec<(String, Transform)>>>,
}

impl StaticTransforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the pose of `child` expressed in `parent`
    pub fn insert(&self, parent: &str, child: &str, transform: Transform) {
        debug!(%parent, %child, "StaticTransforms::insert: called");
        let mut edges = self.edges.write().unwrap_or_else(PoisonError::into_inner);
        let forward = edges.entry(parent.to_string()).or_default();
        forward.retain(|(n, _)| n != child);
        forward.push((child.to_string(), transform));

        let backward = edges.entry(child.to_string()).or_default();
        backward.retain(|(n, _)| n != parent);
        backward.push((parent.to_string(), invert(&transform)));
    }

    fn path_transform(&self, source: &str, target: &str) -> Option<Transform> {
        if source == target {
            return Some(Transform::default());
        }

        let edges = self.edges.read().unwrap_or_else(PoisonError::into_inner);
        let mut visited: HashSet<&str> = HashSet::from([source]);
        let mut queue: VecDeque<(&str, Transform)> = VecDeque::from([(source, Transform::default())]);

        while let Some((frame, accumulated)) = queue.pop_front() {
            for (neighbor, edge) in edges.get(frame).into_iter().flatten() {
                if !visited.insert(neighbor.as_str()) {
                    continue;
                }
                let next = compose(&accumulated, edge);
                if neighbor == target {
                    return Some(next);
                }
                queue.push_back((neighbor.as_str(), next));
            }
        }
        None
    }
}

impl TransformProvider for StaticTransforms {
    fn lookup(
        &self,
        source_frame: &str,
        target_frame: &str,
        _at: Option<DateTime<Utc>>,
    ) -> Result<Transform, TransformError> {
        self.path_transform(source_frame, target_frame)
            .ok_or_else(|| TransformError::NotFound {
                source_frame: source_frame.to_string(),
                target_frame: target_frame.to_string(),
            })
    }
}

fn multiply(a: &Quaternion, b: &Quaternion) -> Quaternion {
    Quaternion {
        x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
        y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
        z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
    }
}

fn conjugate(q: &Quaternion) -> Quaternion {
    Quaternion {
        x: -q.x,
        y: -q.y,
        z: -q.z,
        w: q.w,
    }
}

fn cross(a: &Vector3, b: &Vector3) -> Vector3 {
    Vector3 {
        x: a.y * b.z - a.z * b.y,
        y: a.z * b.x - a.x * b.z,
        z: a.x * b.y - a.y * b.x,
    }
}

fn rotate(q: &Quaternion, v: &Vector3) -> Vector3 {
    let axis = Vector3 { x: q.x, y: q.y, z: q.z };
    let c = cross(&axis, v);
    let t = Vector3 {
        x: 2.0 * c.x,
        y: 2.0 * c.y,
        z: 2.0 * c.z,
    };
    let u = cross(&axis, &t);
    Vector3 {
        x: v.x + q.w * t.x + u.x,
        y: v.y + q.w * t.y + u.y,
        z: v.z + q.w * t.z + u.z,
    }
}

/// `a` then `b`: pose of b's child expressed in a's parent
fn compose(a: &Transform, b: &Transform) -> Transform {
    let moved = rotate(&a.rotation, &b.position);
    Transform {
        position: Vector3 {
            x: a.position.x + moved.x,
            y: a.position.y + moved.y,
            z: a.position.z + moved.z,
        },
        rotation: multiply(&a.rotation, &b.rotation),
    }
}

fn invert(t: &Transform) -> Transform {
    let rotation = conjugate(&t.rotation);
    let p = rotate(&rotation, &t.position);
    Transform {
        position: Vector3 {
            x: -p.x,
            y: -p.y,
            z: -p.z,
        },
        rotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn translation(x: f64, y: f64, z: f64) -> Transform {
        Transform {
            position: Vector3 { x, y, z },
            rotation: Quaternion::default(),
        }
    }

    /// Rotation of `deg` degrees about +z
    fn yaw(deg: f64) -> Quaternion {
        let half = deg.to_radians() / 2.0;
        Quaternion {
            x: 0.0,
            y: 0.0,
            z: half.sin(),
            w: half.cos(),
        }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < EPS, "{a} != {b}");
    }

    #[test]
    fn test_identity_lookup() {
        let tree = StaticTransforms::new();
        assert_eq!(tree.lookup("map", "map", None).unwrap(), Transform::default());
    }

    #[test]
    fn test_direct_and_inverse_lookup() {
        let tree = StaticTransforms::new();
        tree.insert("map", "robot/base_link", translation(3.0, 4.0, 0.0));

        let forward = tree.lookup("map", "robot/base_link", None).unwrap();
        assert_close(forward.position.x, 3.0);

        let backward = tree.lookup("robot/base_link", "map", None).unwrap();
        assert_close(backward.position.x, -3.0);
        assert_close(backward.position.y, -4.0);
    }

    #[test]
    fn test_chain_composes_rotation() {
        let tree = StaticTransforms::new();
        tree.insert(
            "map",
            "odom",
            Transform {
                position: Vector3::default(),
                rotation: yaw(90.0),
            },
        );
        tree.insert("odom", "robot/base_link", translation(1.0, 0.0, 0.0));

        let t = tree.lookup("map", "robot/base_link", None).unwrap();
        assert_close(t.position.x, 0.0);
        assert_close(t.position.y, 1.0);
        assert_close(t.rotation.z, yaw(90.0).z);
    }

    #[test]
    fn test_inverse_undoes_rotation_and_translation() {
        let t = Transform {
            position: Vector3 { x: 1.0, y: 2.0, z: 3.0 },
            rotation: yaw(30.0),
        };
        let round = compose(&t, &invert(&t));
        assert_close(round.position.x, 0.0);
        assert_close(round.position.y, 0.0);
        assert_close(round.position.z, 0.0);
        assert_close(round.rotation.w, 1.0);
    }

    #[test]
    fn test_unconnected_frames_not_found() {
        let tree = StaticTransforms::new();
        tree.insert("map", "odom", translation(1.0, 0.0, 0.0));
        let err = tree.lookup("lidar", "robot/base_link", None).unwrap_err();
        assert!(matches!(err, TransformError::NotFound { .. }));
    }
}
