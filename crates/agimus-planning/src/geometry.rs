//! Collision geometry attached to the robot.
//!
//! A [`GeometryModel`] is a list of [`GeometryObject`]s, each rigidly fixed to
//! a joint.  Objects are unique by name: adding an object whose name is
//! already present replaces the previous one in place, so re-capturing a
//! point cloud swaps the old occupancy tree for the new one.

use std::sync::Arc;

use agimus_perception::{OcTree, Transform3D, Vec3};

use crate::device::{FrameIndex, JointIndex};

pub type GeometryIndex = usize;

/// Shape of a geometry object.
#[derive(Debug, Clone)]
pub enum Geometry {
    OcTree(Arc<OcTree>),
    Box { half_extents: Vec3 },
    Sphere { radius: f64 },
}

#[derive(Debug, Clone)]
pub struct GeometryObject {
    pub name: String,
    pub parent_joint: JointIndex,
    /// Frame the object was defined relative to, when known.
    pub parent_frame: Option<FrameIndex>,
    pub geometry: Geometry,
    /// Placement of the object in its parent joint frame.
    pub placement: Transform3D,
}

impl GeometryObject {
    /// The occupancy tree of the object, if it is one.
    pub fn octree(&self) -> Option<&Arc<OcTree>> {
        match &self.geometry {
            Geometry::OcTree(tree) => Some(tree),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeometryModel {
    objects: Vec<GeometryObject>,
}

impl GeometryModel {
    /// Insert `object`, replacing any object of the same name.
    ///
    /// Returns the index of the object in the model.
    pub fn add_geometry_object(&mut self, object: GeometryObject) -> GeometryIndex {
        match self.geometry_id(&object.name) {
            Some(index) => {
                self.objects[index] = object;
                index
            }
            None => {
                self.objects.push(object);
                self.objects.len() - 1
            }
        }
    }

    pub fn geometry_id(&self, name: &str) -> Option<GeometryIndex> {
        self.objects.iter().position(|o| o.name == name)
    }

    pub fn geometry_object(&self, name: &str) -> Option<&GeometryObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn get(&self, index: GeometryIndex) -> Option<&GeometryObject> {
        self.objects.get(index)
    }

    pub fn remove(&mut self, name: &str) -> Option<GeometryObject> {
        self.geometry_id(name).map(|i| self.objects.remove(i))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeometryObject> {
        self.objects.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(name: &str, radius: f64) -> GeometryObject {
        GeometryObject {
            name: name.into(),
            parent_joint: 0,
            parent_frame: None,
            geometry: Geometry::Sphere { radius },
            placement: Transform3D::identity(),
        }
    }

    #[test]
    fn add_and_lookup() {
        let mut model = GeometryModel::default();
        assert!(model.is_empty());
        let i = model.add_geometry_object(sphere("ball", 0.1));
        assert_eq!(i, 0);
        assert_eq!(model.len(), 1);
        assert!(model.geometry_object("ball").is_some());
        assert!(model.geometry_object("cube").is_none());
    }

    #[test]
    fn same_name_replaces_in_place() {
        let mut model = GeometryModel::default();
        model.add_geometry_object(sphere("a", 0.1));
        model.add_geometry_object(sphere("b", 0.2));
        let i = model.add_geometry_object(sphere("a", 0.5));

        assert_eq!(i, 0);
        assert_eq!(model.len(), 2);
        match model.geometry_object("a").unwrap().geometry {
            Geometry::Sphere { radius } => assert_eq!(radius, 0.5),
            ref other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn remove_by_name() {
        let mut model = GeometryModel::default();
        model.add_geometry_object(sphere("a", 0.1));
        assert!(model.remove("a").is_some());
        assert!(model.remove("a").is_none());
        assert!(model.is_empty());
    }

    #[test]
    fn octree_accessor_only_matches_octrees() {
        assert!(sphere("a", 0.1).octree().is_none());
    }
}
