//! Barnes-Hut quadtree used as the coarse spatial index for repulsion.
//!
//! The quadtree recursively subdivides space and computes center of mass
//! for each cell. Distant cells are approximated as single points, and cells
//! lying wholly beyond the cutoff radius are skipped.

use crate::LayoutNode;

/// Pairs closer than this are treated as coincident and exert no force.
pub(crate) const MIN_DISTANCE_SQ: f32 = 1e-6;

/// Unit-strength repulsion of a point displaced by `(dx, dy)` from its source,
/// magnitude `1 / d`, or `None` when coincident or beyond the cutoff.
#[inline]
pub(crate) fn repulsion(dx: f32, dy: f32, cutoff_sq: f32) -> Option<(f32, f32)> {
    let dist_sq = dx * dx + dy * dy;
    if dist_sq < MIN_DISTANCE_SQ || dist_sq > cutoff_sq {
        return None;
    }
    Some((dx / dist_sq, dy / dist_sq))
}

/// One flattened tree cell.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuadCell {
    /// Center of mass X
    pub center_x: f32,
    /// Center of mass Y
    pub center_y: f32,
    /// Number of nodes in this cell
    pub mass: f32,
    /// Lower-left corner
    pub x: f32,
    pub y: f32,
    pub width: f32,
    /// Index of each child (-1 if absent)
    pub child_nw: i32,
    pub child_ne: i32,
    pub child_sw: i32,
    pub child_se: i32,
    /// Leaves: span into the point list
    pub first_point: u32,
    pub point_count: u32,
}

impl QuadCell {
    pub fn is_leaf(&self) -> bool {
        self.child_nw < 0 && self.child_ne < 0 && self.child_sw < 0 && self.child_se < 0
    }

    fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.width
    }

    /// Squared distance from a point to the cell's square.
    fn distance_sq_to(&self, px: f32, py: f32) -> f32 {
        let nx = px.clamp(self.x, self.x + self.width);
        let ny = py.clamp(self.y, self.y + self.width);
        (px - nx) * (px - nx) + (py - ny) * (py - ny)
    }

    fn children(&self) -> [i32; 4] {
        [self.child_nw, self.child_ne, self.child_sw, self.child_se]
    }
}

/// A Barnes-Hut quadtree over a set of layout nodes.
#[derive(Debug, Clone, Default)]
pub struct QuadTree {
    cells: Vec<QuadCell>,
    points: Vec<u32>,
}

impl QuadTree {
    /// Build a quadtree from node positions.
    ///
    /// # Arguments
    /// * `nodes` - Node positions, indexed by layout index
    /// * `max_depth` - Maximum tree depth (typically 10-15)
    pub fn build(nodes: &[LayoutNode], max_depth: usize) -> Self {
        if nodes.is_empty() {
            return Self::default();
        }

        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for n in nodes {
            min_x = min_x.min(n.x);
            min_y = min_y.min(n.y);
            max_x = max_x.max(n.x);
            max_y = max_y.max(n.y);
        }

        let padding = ((max_x - min_x).max(max_y - min_y) * 0.1).max(1.0);
        min_x -= padding;
        min_y -= padding;
        max_x += padding;
        max_y += padding;

        // Make it square
        let width = (max_x - min_x).max(max_y - min_y);
        let center_x = (min_x + max_x) / 2.0;
        let center_y = (min_y + max_y) / 2.0;

        let mut tree = Self {
            cells: Vec::with_capacity(nodes.len() * 2),
            points: Vec::with_capacity(nodes.len()),
        };
        let mut builder = TreeBuilder {
            nodes,
            tree: &mut tree,
            max_depth,
        };
        let indices: Vec<u32> = (0..nodes.len() as u32).collect();
        builder.build_cell(&indices, center_x - width / 2.0, center_y - width / 2.0, width, 0);
        tree
    }

    pub fn cells(&self) -> &[QuadCell] {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sum of unit repulsions acting on node `index`.
    ///
    /// Leaf points are read from `nodes` (the caller's current positions);
    /// aggregated cells use the centers of mass captured at build time.
    /// `theta == 0` disables approximation, leaving only cutoff pruning.
    pub fn repulsion_on(
        &self,
        nodes: &[LayoutNode],
        index: u32,
        cutoff: f32,
        theta: f32,
    ) -> (f32, f32) {
        let Some(me) = nodes.get(index as usize) else {
            return (0.0, 0.0);
        };
        let (px, py) = (me.x, me.y);
        let cutoff_sq = cutoff * cutoff;
        let mut fx = 0.0;
        let mut fy = 0.0;
        let mut stack: Vec<i32> = Vec::with_capacity(64);
        if !self.cells.is_empty() {
            stack.push(0);
        }

        while let Some(cell_idx) = stack.pop() {
            let cell = &self.cells[cell_idx as usize];
            if cell.mass <= 0.0 || cell.distance_sq_to(px, py) > cutoff_sq {
                continue;
            }

            if cell.is_leaf() {
                let span =
                    cell.first_point as usize..(cell.first_point + cell.point_count) as usize;
                for &j in &self.points[span] {
                    if j == index {
                        continue;
                    }
                    let other = &nodes[j as usize];
                    if let Some((rx, ry)) = repulsion(px - other.x, py - other.y, cutoff_sq) {
                        fx += rx;
                        fy += ry;
                    }
                }
                continue;
            }

            let dx = px - cell.center_x;
            let dy = py - cell.center_y;
            let dist = (dx * dx + dy * dy).sqrt();
            // Barnes-Hut criterion, never for a cell containing the query point
            if theta > 0.0 && !cell.contains(px, py) && dist > 0.0 && cell.width / dist < theta {
                if let Some((rx, ry)) = repulsion(dx, dy, cutoff_sq) {
                    fx += rx * cell.mass;
                    fy += ry * cell.mass;
                }
            } else {
                stack.extend(cell.children().into_iter().filter(|&c| c >= 0));
            }
        }

        (fx, fy)
    }
}

struct TreeBuilder<'a> {
    nodes: &'a [LayoutNode],
    tree: &'a mut QuadTree,
    max_depth: usize,
}

impl<'a> TreeBuilder<'a> {
    fn build_cell(&mut self, indices: &[u32], x: f32, y: f32, width: f32, depth: usize) -> i32 {
        if indices.is_empty() {
            return -1;
        }

        let cell_idx = self.tree.cells.len() as i32;
        self.tree.cells.push(QuadCell::default());

        // Compute center of mass
        let mass = indices.len() as f32;
        let (mut com_x, mut com_y) = (0.0, 0.0);
        for &i in indices {
            com_x += self.nodes[i as usize].x;
            com_y += self.nodes[i as usize].y;
        }
        com_x /= mass;
        com_y /= mass;

        let mut cell = QuadCell {
            center_x: com_x,
            center_y: com_y,
            mass,
            x,
            y,
            width,
            child_nw: -1,
            child_ne: -1,
            child_sw: -1,
            child_se: -1,
            first_point: 0,
            point_count: 0,
        };

        // If leaf (single node or max depth), store its points
        if indices.len() == 1 || depth >= self.max_depth {
            cell.first_point = self.tree.points.len() as u32;
            cell.point_count = indices.len() as u32;
            self.tree.points.extend_from_slice(indices);
            self.tree.cells[cell_idx as usize] = cell;
            return cell_idx;
        }

        // Subdivide into quadrants
        let half_width = width / 2.0;
        let mid_x = x + half_width;
        let mid_y = y + half_width;

        let mut nw = Vec::new();
        let mut ne = Vec::new();
        let mut sw = Vec::new();
        let mut se = Vec::new();
        for &i in indices {
            let n = &self.nodes[i as usize];
            if n.x < mid_x {
                if n.y < mid_y {
                    sw.push(i);
                } else {
                    nw.push(i);
                }
            } else if n.y < mid_y {
                se.push(i);
            } else {
                ne.push(i);
            }
        }

        cell.child_nw = self.build_cell(&nw, x, mid_y, half_width, depth + 1);
        cell.child_ne = self.build_cell(&ne, mid_x, mid_y, half_width, depth + 1);
        cell.child_sw = self.build_cell(&sw, x, y, half_width, depth + 1);
        cell.child_se = self.build_cell(&se, mid_x, y, half_width, depth + 1);
        self.tree.cells[cell_idx as usize] = cell;

        cell_idx
    }
}
