//! Axis-aligned BSP over the world triangles.
//!
//! Every inner node splits its box with one axis plane. Triangles fully on
//! one side go to that child, triangles crossing the plane stay on the node.

use crate::{
    batch::WorldTriangle,
    geometry::{intersect_triangle, Aabb, Hit, Ray, PARALLEL_EPSILON},
};
use glam::Vec3;
use std::ops::Range;

const LEAF_SIZE: usize = 8;
const MAX_DEPTH: u32 = 24;

#[derive(Clone, Debug)]
enum NodeKind {
    Leaf,
    Inner {
        axis: usize,
        distance: f32,
        /// Children below and above the plane.
        children: [u32; 2],
    },
}

#[derive(Clone, Debug)]
struct Node {
    aabb: Aabb,
    kind: NodeKind,
    triangles: Range<u32>,
}

#[derive(Debug, Default)]
pub struct BspTree {
    nodes: Vec<Node>,
    triangles: Vec<WorldTriangle>,
    order: Vec<u32>,
}

fn triangle_aabb(triangle: &WorldTriangle) -> Aabb {
    Aabb::from_points(triangle.positions)
}

impl BspTree {
    #[profiling::function]
    pub fn build(triangles: Vec<WorldTriangle>) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            order: Vec::with_capacity(triangles.len()),
            triangles,
        };
        if !tree.triangles.is_empty() {
            let all = (0..tree.triangles.len() as u32).collect();
            tree.build_node(all, 0);
        }
        log::debug!(
            "BSP built with {} nodes over {} triangles",
            tree.nodes.len(),
            tree.triangles.len()
        );
        tree
    }

    fn build_node(&mut self, members: Vec<u32>, depth: u32) -> u32 {
        let aabb = members
            .iter()
            .fold(Aabb::EMPTY, |acc, &i| acc.union(&triangle_aabb(&self.triangles[i as usize])));
        let index = self.nodes.len() as u32;
        self.nodes.push(Node {
            aabb,
            kind: NodeKind::Leaf,
            triangles: 0..0,
        });

        let split = if members.len() <= LEAF_SIZE || depth >= MAX_DEPTH {
            None
        } else {
            self.choose_split(&members, &aabb)
        };
        let (kind, kept) = match split {
            Some((axis, distance, below, above, crossing)) => {
                let low = self.build_node(below, depth + 1);
                let high = self.build_node(above, depth + 1);
                let kind = NodeKind::Inner {
                    axis,
                    distance,
                    children: [low, high],
                };
                (kind, crossing)
            }
            None => (NodeKind::Leaf, members),
        };
        let start = self.order.len() as u32;
        self.order.extend_from_slice(&kept);
        let node = &mut self.nodes[index as usize];
        node.kind = kind;
        node.triangles = start..self.order.len() as u32;
        index
    }

    #[allow(clippy::type_complexity)]
    fn choose_split(
        &self,
        members: &[u32],
        aabb: &Aabb,
    ) -> Option<(usize, f32, Vec<u32>, Vec<u32>, Vec<u32>)> {
        let extent = aabb.extent();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        let mut centers = members
            .iter()
            .map(|&i| triangle_aabb(&self.triangles[i as usize]).center()[axis])
            .collect::<Vec<_>>();
        centers.sort_by(f32::total_cmp);
        let distance = centers[centers.len() / 2];

        let (mut below, mut above, mut crossing) = (Vec::new(), Vec::new(), Vec::new());
        for &i in members {
            let bounds = triangle_aabb(&self.triangles[i as usize]);
            if bounds.max[axis] <= distance {
                below.push(i);
            } else if bounds.min[axis] >= distance {
                above.push(i);
            } else {
                crossing.push(i);
            }
        }
        if below.is_empty() || above.is_empty() {
            return None;
        }
        Some((axis, distance, below, above, crossing))
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::EMPTY, |node| node.aabb)
    }

    pub fn triangle(&self, index: u32) -> Option<&WorldTriangle> {
        self.triangles.get(index as usize)
    }

    fn test_triangles(&self, node: &Node, ray: &Ray, best: &mut Option<Hit>, t_max: &mut f32) {
        for &i in &self.order[node.triangles.start as usize..node.triangles.end as usize] {
            let triangle = &self.triangles[i as usize];
            let [v0, v1, v2] = triangle.positions;
            if let Some((t, u, v)) = intersect_triangle(ray, v0, v1, v2) {
                if t < *t_max {
                    *t_max = t;
                    *best = Some(Hit {
                        t,
                        position: ray.at(t),
                        normal: (v1 - v0).cross(v2 - v0).normalize_or_zero(),
                        triangle: i,
                        material: triangle.material,
                        barycentrics: [u, v],
                    });
                }
            }
        }
    }

    fn walk(&self, index: u32, ray: &Ray, best: &mut Option<Hit>, t_max: &mut f32, any: bool) {
        let node = &self.nodes[index as usize];
        if node.aabb.intersect(ray, *t_max).is_none() {
            return;
        }
        if let NodeKind::Inner {
            axis,
            distance,
            children,
        } = node.kind
        {
            let origin = ray.origin[axis];
            let direction = ray.direction[axis];
            let (near, far) = if origin < distance {
                (children[0], children[1])
            } else {
                (children[1], children[0])
            };
            self.walk(near, ray, best, t_max, any);
            if any && best.is_some() {
                return;
            }
            if direction.abs() >= PARALLEL_EPSILON {
                let t = (distance - origin) / direction;
                if t >= 0.0 && t < *t_max {
                    self.walk(far, ray, best, t_max, any);
                }
            } else if origin == distance {
                self.walk(far, ray, best, t_max, any);
            }
            if any && best.is_some() {
                return;
            }
        }
        self.test_triangles(node, ray, best, t_max);
    }

    /// Closest hit along the ray.
    pub fn trace_ray(&self, ray: &Ray, t_max: f32) -> Option<Hit> {
        let mut best = None;
        let mut t = t_max;
        if !self.nodes.is_empty() {
            self.walk(0, ray, &mut best, &mut t, false);
        }
        best
    }

    /// Whether anything blocks the segment from `origin` to `target`,
    /// limited to `max_distance`.
    pub fn trace_shadow_ray(&self, origin: Vec3, target: Vec3, max_distance: f32) -> bool {
        let offset = target - origin;
        let length = offset.length();
        if length <= 0.0 || self.nodes.is_empty() {
            return false;
        }
        let ray = Ray::new(origin, offset / length);
        self.is_occluded(&ray, length.min(max_distance))
    }

    pub fn is_occluded(&self, ray: &Ray, max_distance: f32) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        let mut best = None;
        let mut t = max_distance;
        self.walk(0, ray, &mut best, &mut t, true);
        best.is_some()
    }
}
