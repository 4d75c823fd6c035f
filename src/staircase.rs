//! Free-stage branching scheme over an uncovered-item frontier.
//!
//! The frontier is the y-sorted upper envelope of the packed items. A new
//! item anchors at an uncovered position, lands right of everything its
//! y-range overlaps, and splices the envelope. With the staircase option,
//! dominance max-propagates the envelope so stair-shaped frontiers compare.

use crate::instance::{
    strictly_greater, Area, CutOrientation, Instance, ItemTypeId, Length, Objective, Profit,
    Weight,
};
use crate::search::{BranchingScheme, BucketKey, GuideKey};
use crate::solution::{NodeContent, Solution, SolutionBin, SolutionNode};

use smallvec::SmallVec;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One interval of the upper envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UncoveredItem {
    /// Item type whose top edge forms this interval, `None` for the floor.
    pub item_type_id: Option<ItemTypeId>,
    /// Start x-coordinate.
    pub xs: Length,
    /// End x-coordinate.
    pub xe: Length,
    /// End x-coordinate used by the dominance walk.
    pub xe_dominance: Length,
    /// Start y-coordinate.
    pub ys: Length,
    /// End y-coordinate.
    pub ye: Length,
}

/// Immutable search node of the staircase scheme.
#[derive(Clone, Debug)]
pub struct Node {
    /// Node id, increasing in creation order.
    pub id: u64,
    /// Parent node, `None` for the root.
    pub parent: Option<Arc<Node>>,
    /// Last inserted item type.
    pub item_type_id: Option<ItemTypeId>,
    /// Whether the last item was rotated.
    pub rotate: bool,
    /// Bottom-left corner of the last item.
    pub x: Length,
    /// Bottom-left corner of the last item.
    pub y: Length,
    /// Envelope of the current bin.
    pub uncovered_items: Vec<UncoveredItem>,
    /// For each item type, copies consumed.
    pub item_number_of_copies: SmallVec<[i64; 16]>,
    /// Number of bins opened.
    pub number_of_bins: usize,
    /// Number of items placed.
    pub number_of_items: i64,
    /// Total placed item area.
    pub item_area: Area,
    /// Envelope area of the closed and current bins.
    pub guide_area: Area,
    /// `guide_area - item_area`.
    pub waste: Area,
    /// Largest item right edge in the current bin.
    pub xe_max: Length,
    /// Largest item top edge in the current bin.
    pub ye_max: Length,
    /// Profit of the placed items.
    pub profit: Profit,
    /// Cost of the opened bins.
    pub cost: Profit,
    /// Weight packed in the current bin.
    pub last_bin_weight: Weight,
    /// Sum of x-weighted weights in the current bin, for the axle guides.
    pub last_bin_weight_weighted_sum: Weight,
}

/// Scheme options chosen per search worker.
#[derive(Clone, Debug)]
pub struct StaircaseParameters {
    /// Guide id used for queue ordering.
    pub guide: u8,
    /// Packing axis: `Vertical` packs along x, `Horizontal` along y.
    pub direction: CutOrientation,
    /// Whether dominance max-propagates the envelope.
    pub staircase: bool,
    /// Predecessor strategy: 0 profit, 1 lighter, 2 heavier.
    pub predecessor_strategy: u8,
}

impl Default for StaircaseParameters {
    fn default() -> Self {
        StaircaseParameters {
            guide: 0,
            direction: CutOrientation::Vertical,
            staircase: false,
            predecessor_strategy: 0,
        }
    }
}

/// The staircase branching scheme over an instance.
pub struct StaircaseScheme<'a> {
    instance: &'a Instance,
    parameters: StaircaseParameters,
    node_id: AtomicU64,
}

impl<'a> StaircaseScheme<'a> {
    /// Creates a scheme over `instance`.
    pub fn new(instance: &'a Instance, parameters: StaircaseParameters) -> Self {
        StaircaseScheme {
            instance,
            parameters,
            node_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.node_id.fetch_add(1, Ordering::Relaxed)
    }

    fn o(&self) -> CutOrientation {
        self.parameters.direction
    }

    fn bin_floor(&self, bin_pos: usize) -> (Vec<UncoveredItem>, Length, Length) {
        let bin_type = self
            .instance
            .bin_type(self.instance.bin_type_id_at(bin_pos));
        let o = self.o();
        let left = bin_type.left_trim_o(o).length;
        let bottom = bin_type.bottom_trim_o(o).length;
        let w_use = bin_type.width(o) - bin_type.right_trim_o(o).length;
        let h_use = bin_type.height(o) - bin_type.top_trim_o(o).length;
        let floor = vec![UncoveredItem {
            item_type_id: None,
            xs: left,
            xe: left,
            xe_dominance: left,
            ys: bottom,
            ye: h_use,
        }];
        (floor, w_use, h_use)
    }

    /// Root node with nothing placed.
    pub fn root(&self) -> Arc<Node> {
        Arc::new(Node {
            id: self.next_id(),
            parent: None,
            item_type_id: None,
            rotate: false,
            x: 0,
            y: 0,
            uncovered_items: Vec::new(),
            item_number_of_copies: SmallVec::from_elem(0, self.instance.item_type_count()),
            number_of_bins: 0,
            number_of_items: 0,
            item_area: 0,
            guide_area: 0,
            waste: 0,
            xe_max: 0,
            ye_max: 0,
            profit: 0.0,
            cost: 0.0,
            last_bin_weight: 0.0,
            last_bin_weight_weighted_sum: 0.0,
        })
    }

    /// Returns whether `j` may be inserted given stack precedence and the
    /// predecessor strategy.
    fn item_available(&self, node: &Node, j: ItemTypeId) -> bool {
        let item_type = self.instance.item_type(j);
        if node.item_number_of_copies[j] >= item_type.copies {
            return false;
        }
        // Stack precedence: every earlier item of the stack is consumed.
        for &earlier in self.instance.stack(item_type.stack_id) {
            if earlier == j {
                break;
            }
            let earlier_type = self.instance.item_type(earlier);
            if node.item_number_of_copies[earlier] < earlier_type.copies {
                return false;
            }
        }
        // A dominating type with remaining copies should go first.
        !self
            .instance
            .predecessors(j, self.parameters.predecessor_strategy)
            .iter()
            .any(|&jp| {
                node.item_number_of_copies[jp] < self.instance.item_type(jp).copies
            })
    }

    /// All feasible children of `parent`.
    pub fn children(&self, parent: &Arc<Node>) -> Vec<Arc<Node>> {
        let mut children = Vec::new();
        if parent.number_of_items == self.instance.item_count() {
            return children;
        }
        if parent.number_of_bins > 0 {
            self.bin_insertions(parent, false, &mut children);
        }
        // A new bin is dominated while anything fits in the current one.
        if children.is_empty() && parent.number_of_bins < self.instance.bin_count() {
            self.bin_insertions(parent, true, &mut children);
        }
        children
    }

    fn bin_insertions(&self, parent: &Arc<Node>, new_bin: bool, children: &mut Vec<Arc<Node>>) {
        let o = self.o();
        let bin_pos = if new_bin {
            parent.number_of_bins
        } else {
            parent.number_of_bins - 1
        };
        let (floor, w_use, h_use) = self.bin_floor(bin_pos);
        let uncovered: &[UncoveredItem] = if new_bin {
            &floor
        } else {
            &parent.uncovered_items
        };
        let bin_type_id = self.instance.bin_type_id_at(bin_pos);

        for j in 0..self.instance.item_type_count() {
            if !self.item_available(parent, j) {
                continue;
            }
            let item_type = self.instance.item_type(j);
            let rotations: &[bool] = if item_type.oriented {
                &[false]
            } else {
                &[false, true]
            };
            for &rotate in rotations {
                let w = item_type.width(rotate, o);
                let h = item_type.height(rotate, o);
                let mut previous_xs = Length::MAX;
                for position in 0..uncovered.len() {
                    let ys = uncovered[position].ys;
                    let ye = ys + h;
                    if ye > h_use {
                        continue;
                    }
                    // Envelope maximum over the covered y-range.
                    let mut xs = uncovered
                        .iter()
                        .filter(|u| u.ys < ye && ys < u.ye)
                        .map(|u| u.xe)
                        .max()
                        .unwrap_or(0);
                    // Slide right past defects.
                    loop {
                        match self.instance.item_intersects_defect(
                            xs, ys, item_type, rotate, bin_type_id, o,
                        ) {
                            Some(k) => {
                                xs = self.instance.defect(bin_type_id, k).right(o);
                            }
                            None => break,
                        }
                    }
                    if xs + w > w_use {
                        continue;
                    }
                    // A lower anchor with the same start dominates this one.
                    if xs >= previous_xs {
                        continue;
                    }
                    previous_xs = xs;
                    children.push(
                        self.child(parent, j, rotate, new_bin, bin_pos, xs, ys, w, h, uncovered),
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn child(
        &self,
        parent: &Arc<Node>,
        j: ItemTypeId,
        rotate: bool,
        new_bin: bool,
        bin_pos: usize,
        xs: Length,
        ys: Length,
        w: Length,
        h: Length,
        uncovered: &[UncoveredItem],
    ) -> Arc<Node> {
        let item_type = self.instance.item_type(j);
        let xe = xs + w;
        let ye = ys + h;

        // Splice the envelope.
        let mut next: Vec<UncoveredItem> = Vec::with_capacity(uncovered.len() + 2);
        let mut covered_dominance = xe;
        for u in uncovered {
            if u.ye <= ys || u.ys >= ye {
                next.push(u.clone());
                continue;
            }
            covered_dominance = covered_dominance.max(u.xe_dominance);
            if u.ys < ys {
                let mut low = u.clone();
                low.ye = ys;
                next.push(low);
            }
            if u.ye > ye {
                let mut high = u.clone();
                high.ys = ye;
                next.push(high);
            }
        }
        next.push(UncoveredItem {
            item_type_id: Some(j),
            xs,
            xe,
            xe_dominance: if self.parameters.staircase {
                covered_dominance
            } else {
                xe
            },
            ys,
            ye,
        });
        next.sort_by_key(|u| u.ys);

        let mut item_number_of_copies = parent.item_number_of_copies.clone();
        item_number_of_copies[j] += 1;

        let bin_type = self.instance.bin_type(self.instance.bin_type_id_at(bin_pos));
        let previous_bins = self.instance.previous_bin_area(bin_pos);
        let envelope_area: Area = next
            .iter()
            .map(|u| (u.xe - bin_type.left_trim_o(self.o()).length) * (u.ye - u.ys))
            .sum();
        let guide_area = previous_bins + envelope_area;

        let (xe_max, ye_max, last_bin_weight, last_bin_weight_weighted_sum, cost) = if new_bin {
            (
                xe,
                ye,
                item_type.weight,
                (xs + xe) as f64 / 2.0 * item_type.weight,
                parent.cost + bin_type.cost,
            )
        } else {
            (
                parent.xe_max.max(xe),
                parent.ye_max.max(ye),
                parent.last_bin_weight + item_type.weight,
                parent.last_bin_weight_weighted_sum + (xs + xe) as f64 / 2.0 * item_type.weight,
                parent.cost,
            )
        };

        Arc::new(Node {
            id: self.next_id(),
            parent: Some(parent.clone()),
            item_type_id: Some(j),
            rotate,
            x: xs,
            y: ys,
            uncovered_items: next,
            item_number_of_copies,
            number_of_bins: if new_bin {
                parent.number_of_bins + 1
            } else {
                parent.number_of_bins
            },
            number_of_items: parent.number_of_items + 1,
            item_area: parent.item_area + item_type.rect.area(),
            guide_area,
            waste: guide_area - (parent.item_area + item_type.rect.area()),
            xe_max,
            ye_max,
            profit: parent.profit + item_type.profit,
            cost,
            last_bin_weight,
            last_bin_weight_weighted_sum,
        })
    }

    fn full(&self, node: &Node) -> bool {
        node.number_of_items == self.instance.item_count()
    }

    fn ubkp(&self, node: &Node) -> Profit {
        let remaining_item_area = self.instance.item_area() - node.item_area;
        let remaining_packable = self.instance.packable_area() - node.guide_area;
        if remaining_packable >= remaining_item_area {
            self.instance.item_profit()
        } else {
            let efficiency = match self.instance.max_efficiency_item_type() {
                Some(j) => {
                    let item_type = self.instance.item_type(j);
                    item_type.profit / item_type.rect.area() as f64
                }
                None => 0.0,
            };
            node.profit + remaining_packable as f64 * efficiency
        }
    }

    /// Area load of the node against the reference load of the instance,
    /// used by the axle guides to demote under-filled nodes.
    fn load_band(&self, node: &Node) -> (f64, f64) {
        let bin_area = self
            .instance
            .bin_type(self.instance.bin_type_id_at(0))
            .area();
        let bins_needed = (self.instance.item_area() + bin_area - 1) / bin_area.max(1);
        let reference = self.instance.item_area() as f64 / (bins_needed * bin_area).max(1) as f64;
        let load = node.item_area as f64 / node.guide_area.max(1) as f64;
        (load, reference)
    }

    /// Middle-axle proxy: the center-of-gravity weighted load of the bin.
    fn middle_axle_weight(&self, node: &Node) -> f64 {
        let bin_type = self.instance.bin_type(self.instance.bin_type_id_at(0));
        node.last_bin_weight_weighted_sum / bin_type.width(self.o()).max(1) as f64
    }

    /// Materializes the free placement as one depth-1 node per item.
    pub fn to_solution(&self, node: &Arc<Node>) -> Solution {
        let mut chain: Vec<Arc<Node>> = Vec::new();
        let mut cursor = Some(node.clone());
        while let Some(n) = cursor {
            if n.parent.is_some() {
                chain.push(n.clone());
            }
            cursor = n.parent.clone();
        }
        chain.reverse();

        let o = self.o();
        let mut bins: Vec<SolutionBin> = Vec::new();
        let mut bin_count = 0usize;
        for n in &chain {
            if n.number_of_bins > bin_count {
                bin_count = n.number_of_bins;
                let bin_type = self
                    .instance
                    .bin_type(self.instance.bin_type_id_at(bin_count - 1));
                bins.push(SolutionBin {
                    bin_type_id: bin_type.id,
                    copies: 1,
                    first_cut_orientation: o,
                    nodes: vec![SolutionNode {
                        parent: None,
                        depth: 0,
                        l: 0,
                        r: bin_type.rect.w,
                        b: 0,
                        t: bin_type.rect.h,
                        content: NodeContent::Branch,
                    }],
                });
            }
            let bin = bins.last_mut().expect("item before any bin");
            let j = n.item_type_id.expect("staircase nodes place one item");
            let item_type = self.instance.item_type(j);
            let (l, r, b, t) = match o {
                CutOrientation::Vertical => (
                    n.x,
                    n.x + item_type.width(n.rotate, o),
                    n.y,
                    n.y + item_type.height(n.rotate, o),
                ),
                CutOrientation::Horizontal => (
                    n.y,
                    n.y + item_type.height(n.rotate, o),
                    n.x,
                    n.x + item_type.width(n.rotate, o),
                ),
            };
            bin.nodes.push(SolutionNode {
                parent: Some(0),
                depth: 1,
                l,
                r,
                b,
                t,
                content: NodeContent::Item(j),
            });
        }
        Solution::from_bins(self.instance, bins)
    }
}

impl<'a> BranchingScheme for StaircaseScheme<'a> {
    type Node = Arc<Node>;

    fn instance(&self) -> &Instance {
        self.instance
    }

    fn root(&self) -> Arc<Node> {
        StaircaseScheme::root(self)
    }

    fn children(&self, parent: &Arc<Node>) -> Vec<Arc<Node>> {
        StaircaseScheme::children(self, parent)
    }

    fn leaf(&self, node: &Arc<Node>) -> bool {
        self.full(node)
    }

    fn better(&self, node: &Arc<Node>, best: &Arc<Node>) -> bool {
        match self.instance.objective() {
            Objective::Default => {
                if strictly_greater(node.profit, best.profit) {
                    return true;
                }
                if strictly_greater(best.profit, node.profit) {
                    return false;
                }
                node.waste < best.waste
            }
            Objective::BinPacking => {
                self.full(node) && (!self.full(best) || node.number_of_bins < best.number_of_bins)
            }
            Objective::BinPackingWithLeftovers => {
                self.full(node) && (!self.full(best) || node.waste < best.waste)
            }
            Objective::OpenDimensionX => {
                self.full(node) && (!self.full(best) || node.xe_max < best.xe_max)
            }
            Objective::OpenDimensionY => {
                self.full(node) && (!self.full(best) || node.ye_max < best.ye_max)
            }
            Objective::Knapsack | Objective::SequentialOneDimensionalSub => {
                strictly_greater(node.profit, best.profit)
            }
            Objective::VariableSizedBinPacking => {
                self.full(node) && (!self.full(best) || strictly_greater(best.cost, node.cost))
            }
        }
    }

    fn bound(&self, node: &Arc<Node>, best: &Arc<Node>) -> bool {
        match self.instance.objective() {
            Objective::Default
            | Objective::Knapsack
            | Objective::SequentialOneDimensionalSub => {
                !strictly_greater(self.ubkp(node), best.profit)
            }
            Objective::BinPacking => {
                self.full(best) && node.number_of_bins >= best.number_of_bins
            }
            Objective::BinPackingWithLeftovers => self.full(best) && node.waste >= best.waste,
            Objective::OpenDimensionX => self.full(best) && node.xe_max >= best.xe_max,
            Objective::OpenDimensionY => self.full(best) && node.ye_max >= best.ye_max,
            Objective::VariableSizedBinPacking => {
                self.full(best) && !strictly_greater(best.cost, node.cost)
            }
        }
    }

    fn guide(&self, node: &Arc<Node>) -> GuideKey {
        let guide_area = node.guide_area as f64;
        let item_area = node.item_area as f64;
        let items = node.number_of_items as f64;
        let id = node.id;
        match self.parameters.guide {
            1 => GuideKey::single(
                guide_area / item_area / (node.profit / items.max(1.0)) * items,
                id,
            ),
            2 => GuideKey::single(
                (node.xe_max * node.ye_max) as f64 / item_area,
                id,
            ),
            3 => GuideKey::single(
                (node.xe_max * node.ye_max) as f64 / item_area / item_area * items,
                id,
            ),
            4 => GuideKey::single(guide_area / node.profit, id),
            5 => GuideKey::single(guide_area / node.profit / item_area * items, id),
            6 => GuideKey::single(node.waste as f64, id),
            7 => GuideKey::single(-self.ubkp(node), id),
            8 => {
                let (load, reference) = self.load_band(node);
                let band = if load < reference { 1.0 } else { 0.0 };
                GuideKey {
                    k0: band,
                    k1: if load < reference { -load } else { self.middle_axle_weight(node) },
                    k2: 0.0,
                    id,
                }
            }
            9 => {
                let (load, reference) = self.load_band(node);
                let band = if load < reference { 1.0 } else { 0.0 };
                GuideKey {
                    k0: band,
                    k1: if load < reference { -load } else { -node.last_bin_weight },
                    k2: 0.0,
                    id,
                }
            }
            _ => GuideKey::single(guide_area / item_area, id),
        }
    }

    fn dominates(&self, node: &Arc<Node>, other: &Arc<Node>) -> bool {
        if node.number_of_bins != other.number_of_bins {
            return node.number_of_bins < other.number_of_bins;
        }
        if node.uncovered_items.is_empty() || other.uncovered_items.is_empty() {
            return other.uncovered_items.is_empty();
        }
        // Walk both envelopes from the top; at every y-level the first
        // envelope must not protrude past the second's dominance edge.
        let staircase = self.parameters.staircase;
        let items_1 = &node.uncovered_items;
        let items_2 = &other.uncovered_items;
        let mut pos_1 = items_1.len() - 1;
        let mut pos_2 = items_2.len() - 1;
        let mut x1 = items_1[pos_1].xe;
        let mut x2 = items_2[pos_2].xe_dominance;
        loop {
            if x1 > x2 {
                return false;
            }
            if pos_1 == 0 && pos_2 == 0 {
                return true;
            }
            let ys_1 = items_1[pos_1].ys;
            let ys_2 = items_2[pos_2].ys;
            if ys_1 >= ys_2 && pos_1 > 0 {
                pos_1 -= 1;
                x1 = if staircase {
                    x1.max(items_1[pos_1].xe_dominance)
                } else {
                    items_1[pos_1].xe_dominance
                };
            }
            if ys_2 >= ys_1 && pos_2 > 0 {
                pos_2 -= 1;
                x2 = if staircase {
                    x2.max(items_2[pos_2].xe_dominance)
                } else {
                    items_2[pos_2].xe_dominance
                };
            }
        }
    }

    fn bucket_key(&self, node: &Arc<Node>) -> BucketKey {
        node.item_number_of_copies.clone()
    }

    fn to_solution(&self, node: &Arc<Node>) -> Solution {
        StaircaseScheme::to_solution(self, node)
    }
}
