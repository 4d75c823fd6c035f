//! Staged guillotine branching scheme.
//!
//! Each tree level commits one third-level subplate into the frontier:
//! beside the previous one in the current second-level subplate, at the
//! bottom of a new second-level subplate, in a new first-level strip, or in
//! a new bin. A third-level subplate holds a single item at its bottom with
//! possible waste above, a single item at its top when a defect forces
//! waste below, two stacked items of equal width, or pure waste covering a
//! defect.

use crate::instance::{
    strictly_greater, Area, BinType, CutOrientation, CutType, Defect, FirstStageOrientation,
    Instance, ItemTypeId, Length, Objective, Profit, Stages, TrimType,
};
use crate::search::{BranchingScheme, BucketKey, GuideKey};
use crate::solution::{NodeContent, Solution, SolutionBin, SolutionNode};

use smallvec::SmallVec;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Depth of an insertion relative to its parent:
/// 2 keeps the current second-level subplate, 1 opens a new second-level
/// subplate, 0 opens a new first-level strip, -1/-2 open a new bin with a
/// vertical/horizontal first stage.
pub type Depth = i8;

/// One feasible way of extending a partial pattern.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Insertion {
    /// Item at the bottom of the new third-level subplate.
    pub item_type_id_1: Option<ItemTypeId>,
    /// Item at the top of the new third-level subplate.
    pub item_type_id_2: Option<ItemTypeId>,
    /// Insertion depth.
    pub df: Depth,
    /// Position of the current 1-cut after the insertion.
    pub x1: Length,
    /// Position of the current 2-cut after the insertion.
    pub y2: Length,
    /// Position of the current 3-cut after the insertion.
    pub x3: Length,
    /// Maximum position the current 1-cut may reach.
    pub x1_max: Length,
    /// Maximum position the current 2-cut may reach.
    pub y2_max: Length,
    /// Whether the 1-cut may move freely (1) or only by a full
    /// minimum-waste step (0).
    pub z1: u8,
    /// Like `z1` for the 2-cut; 2 pins the 2-cut entirely.
    pub z2: u8,
}

impl Insertion {
    fn has_item(&self) -> bool {
        self.item_type_id_1.is_some() || self.item_type_id_2.is_some()
    }
}

/// Item recorded above a defect in the current second-level subplate; it
/// floats at the top of its subplate, so raising the 2-cut moves it.
#[derive(Copy, Clone, Debug)]
struct AboveDefectItem {
    item_type_id: ItemTypeId,
    rotate: bool,
    x: Length,
}

/// Immutable search node. Shared by all of its descendants; the frontier of
/// closed subplates is recovered by walking the parent chain.
#[derive(Clone, Debug)]
pub struct Node {
    /// Node id, increasing in creation order.
    pub id: u64,
    /// Parent node, `None` for the root.
    pub parent: Option<Arc<Node>>,
    /// Bottom item of the last insertion.
    pub item_type_id_1: Option<ItemTypeId>,
    /// Top item of the last insertion.
    pub item_type_id_2: Option<ItemTypeId>,
    /// Depth of the last insertion.
    pub df: Depth,
    /// Current 1-cut position.
    pub x1_curr: Length,
    /// Previous 1-cut position (start of the current strip).
    pub x1_prev: Length,
    /// Current 2-cut position.
    pub y2_curr: Length,
    /// Previous 2-cut position (bottom of the current subplate).
    pub y2_prev: Length,
    /// Current 3-cut position.
    pub x3_curr: Length,
    /// Maximum position of the current 1-cut.
    pub x1_max: Length,
    /// Maximum position of the current 2-cut.
    pub y2_max: Length,
    /// Extension freedom of the current 1-cut.
    pub z1: u8,
    /// Extension freedom of the current 2-cut.
    pub z2: u8,
    /// For each stack, number of items consumed.
    pub pos_stack: SmallVec<[i64; 16]>,
    /// Number of bins opened.
    pub number_of_bins: usize,
    /// First-stage orientation of the last bin.
    pub first_stage_orientation: CutOrientation,
    /// Number of items placed.
    pub number_of_items: i64,
    /// Total area of the placed items.
    pub item_area: Area,
    /// Area committed so far (closed strips plus the current frontier).
    pub current_area: Area,
    /// Committed area not covered by items.
    pub waste: Area,
    /// Profit of the placed items.
    pub profit: Profit,
    /// Cost of the opened bins.
    pub cost: Profit,
    /// Items floating above defects in the current second-level subplate.
    above_defect_items: SmallVec<[AboveDefectItem; 2]>,
}

/// Scheme parameters chosen per search worker.
#[derive(Clone, Debug, Default)]
pub struct StagedParameters {
    /// Guide id used for queue ordering.
    pub guide: u8,
    /// First-stage orientation override; `Any` defers to the instance.
    pub first_stage_orientation: FirstStageOrientation,
}

/// The staged branching scheme over an instance.
pub struct StagedScheme<'a> {
    instance: &'a Instance,
    parameters: StagedParameters,
    /// Whether exploring horizontal first stages duplicates vertical ones.
    skip_horizontal_symmetry: bool,
    /// Bin-packing lower bound on the number of bins.
    bin_lower_bound: usize,
    node_id: AtomicU64,
}

/// Kind of edge a cut is being aligned against.
#[derive(Copy, Clone, PartialEq, Eq)]
enum EdgeKind {
    Item,
    Waste,
}

/// Moves a cut from `cur` to cover a new edge at `edge`.
///
/// Legal positions relative to an item edge are the edge itself or anything
/// leaving a full waste strip past the cut thickness; positions relative to
/// a waste edge are unconstrained. Returns `None` when the current cut is
/// pinned and cannot reach a legal position.
fn advance_cut(
    cur: Option<(Length, u8)>,
    edge: Length,
    kind: EdgeKind,
    thickness: Length,
    min_waste: Length,
) -> Option<(Length, u8)> {
    let ze = if kind == EdgeKind::Item && min_waste > 0 {
        0
    } else {
        1
    };
    let (cur, z) = match cur {
        None => return Some((edge, ze)),
        Some(c) => c,
    };
    let step = thickness + min_waste;
    if edge == cur {
        let z_out = if z == 2 {
            2
        } else if ze == 0 || z == 0 {
            0
        } else {
            1
        };
        return Some((cur, z_out));
    }
    if edge < cur {
        if ze == 1 || cur >= edge + step {
            return Some((cur, z));
        }
        // The cut sits in the forbidden gap right of the new edge.
        return match z {
            0 => Some((cur + step, 1)),
            1 => Some((edge + step, 1)),
            _ => None,
        };
    }
    match z {
        2 => None,
        1 => Some((edge, ze)),
        _ => {
            if edge >= cur + step {
                Some((edge, ze))
            } else if ze == 1 {
                Some((cur + step, 1))
            } else {
                Some((edge + step, 1))
            }
        }
    }
}

/// Geometry of the bin an insertion lands in, in first-stage coordinates.
struct BinContext<'a> {
    bin_type: &'a BinType,
    o: CutOrientation,
    /// Usable width (right trim removed).
    w_use: Length,
    /// Usable height (top trim removed).
    h_use: Length,
    /// Reference for waste measured against the right border.
    w_end: Length,
    /// Reference for waste measured against the top border.
    h_end: Length,
    /// Start of the usable region.
    left: Length,
    bottom: Length,
    /// Reference for waste measured against the left/bottom borders.
    left_base: Length,
    bottom_base: Length,
}

impl<'a> BinContext<'a> {
    fn new(bin_type: &'a BinType, o: CutOrientation) -> Self {
        let w = bin_type.width(o);
        let h = bin_type.height(o);
        let right = bin_type.right_trim_o(o);
        let top = bin_type.top_trim_o(o);
        let left = bin_type.left_trim_o(o);
        let bottom = bin_type.bottom_trim_o(o);
        BinContext {
            bin_type,
            o,
            w_use: w - right.length,
            h_use: h - top.length,
            w_end: if right.kind == TrimType::Soft { w } else { w - right.length },
            h_end: if top.kind == TrimType::Soft { h } else { h - top.length },
            left: left.length,
            bottom: bottom.length,
            left_base: if left.kind == TrimType::Soft { 0 } else { left.length },
            bottom_base: if bottom.kind == TrimType::Soft { 0 } else { bottom.length },
        }
    }

    fn defects(&self) -> &'a [Defect] {
        &self.bin_type.defects
    }
}

impl<'a> StagedScheme<'a> {
    /// Creates a scheme over `instance`.
    pub fn new(instance: &'a Instance, parameters: StagedParameters) -> Self {
        let no_oriented_items = instance.item_types().iter().all(|j| !j.oriented);
        let symmetric_bins = instance.bin_types().iter().all(|bin_type| {
            bin_type.rect.w == bin_type.rect.h
                && bin_type.defects.is_empty()
                && bin_type.left_trim == bin_type.bottom_trim
                && bin_type.right_trim == bin_type.top_trim
        });
        let mut bin_lower_bound = instance.bin_count();
        let mut area = 0;
        for pos in 0..instance.bin_count() {
            area += instance.bin_type(instance.bin_type_id_at(pos)).area();
            if area >= instance.item_area() {
                bin_lower_bound = pos + 1;
                break;
            }
        }
        StagedScheme {
            instance,
            parameters,
            skip_horizontal_symmetry: no_oriented_items && symmetric_bins,
            bin_lower_bound,
            node_id: AtomicU64::new(0),
        }
    }

    /// The instance being solved.
    pub fn instance(&self) -> &Instance {
        self.instance
    }

    fn next_id(&self) -> u64 {
        self.node_id.fetch_add(1, Ordering::Relaxed)
    }

    fn effective_orientation(&self) -> FirstStageOrientation {
        match self.instance.parameters().first_stage_orientation {
            FirstStageOrientation::Any => self.parameters.first_stage_orientation,
            fixed => fixed,
        }
    }

    /// Root node with nothing placed.
    pub fn root(&self) -> Arc<Node> {
        Arc::new(Node {
            id: self.next_id(),
            parent: None,
            item_type_id_1: None,
            item_type_id_2: None,
            df: -1,
            x1_curr: 0,
            x1_prev: 0,
            y2_curr: 0,
            y2_prev: 0,
            x3_curr: 0,
            x1_max: -1,
            y2_max: -1,
            z1: 0,
            z2: 0,
            pos_stack: SmallVec::from_elem(0, self.instance.stack_count()),
            number_of_bins: 0,
            first_stage_orientation: CutOrientation::Vertical,
            number_of_items: 0,
            item_area: 0,
            current_area: 0,
            waste: 0,
            profit: 0.0,
            cost: 0.0,
            above_defect_items: SmallVec::new(),
        })
    }

    /*
     * Frontier values derived for an insertion depth.
     */

    fn last_bin_orientation(&self, node: &Node, df: Depth) -> CutOrientation {
        match df {
            -1 => CutOrientation::Vertical,
            -2 => CutOrientation::Horizontal,
            _ => node.first_stage_orientation,
        }
    }

    fn last_bin_pos(&self, node: &Node, df: Depth) -> usize {
        if df < 0 {
            node.number_of_bins
        } else {
            node.number_of_bins - 1
        }
    }

    fn bin_context(&self, node: &Node, df: Depth) -> BinContext<'a> {
        let o = self.last_bin_orientation(node, df);
        let bin_type_id = self.instance.bin_type_id_at(self.last_bin_pos(node, df));
        BinContext::new(self.instance.bin_type(bin_type_id), o)
    }

    fn x1_prev(&self, node: &Node, df: Depth, ctx: &BinContext<'_>) -> Length {
        let thickness = self.instance.parameters().cut_thickness;
        match df {
            2 | 1 => node.x1_prev,
            0 => node.x1_curr + thickness,
            _ => ctx.left,
        }
    }

    fn y2_prev(&self, node: &Node, df: Depth, ctx: &BinContext<'_>) -> Length {
        let thickness = self.instance.parameters().cut_thickness;
        match df {
            2 => node.y2_prev,
            1 => node.y2_curr + thickness,
            _ => ctx.bottom,
        }
    }

    fn x3_prev(&self, node: &Node, df: Depth, ctx: &BinContext<'_>) -> Length {
        let thickness = self.instance.parameters().cut_thickness;
        match df {
            2 => node.x3_curr + thickness,
            _ => self.x1_prev(node, df, ctx),
        }
    }

    fn x1_max_initial(&self, node: &Node, df: Depth, ctx: &BinContext<'_>) -> Length {
        if df >= 1 {
            return node.x1_max;
        }
        let x1_prev = self.x1_prev(node, df, ctx);
        match self.instance.parameters().maximum_distance_1_cuts {
            Some(maximum) => ctx.w_use.min(x1_prev + maximum),
            None => ctx.w_use,
        }
    }

    fn y2_max_initial(&self, node: &Node, df: Depth, ctx: &BinContext<'_>) -> Length {
        if df == 2 {
            node.y2_max
        } else {
            ctx.h_use
        }
    }

    /*
     * Child generation
     */

    /// All feasible insertions of `parent`, deepest first.
    pub fn insertions(&self, parent: &Arc<Node>) -> Vec<Insertion> {
        let mut insertions: Vec<Insertion> = Vec::new();
        if parent.number_of_items == self.instance.item_count() {
            return insertions;
        }
        let parameters = self.instance.parameters();
        let df_max: Depth = if parent.number_of_bins == 0 { -1 } else { 2 };
        let orientation = self.effective_orientation();
        let can_open_bin = parent.number_of_bins < self.instance.bin_count();

        for df in (-2..=df_max).rev() {
            if df == 2 && parameters.number_of_stages == Stages::Two {
                continue;
            }
            // Opening a strip or bin is dominated whenever an item already
            // fits at a deeper depth; pure defect insertions suppress
            // nothing.
            if df <= 0 && insertions.iter().any(Insertion::has_item) {
                break;
            }
            if df < 0 {
                if !can_open_bin {
                    continue;
                }
                match orientation {
                    FirstStageOrientation::Vertical if df == -2 => continue,
                    FirstStageOrientation::Horizontal if df == -1 => continue,
                    FirstStageOrientation::Any if df == -2 && self.skip_horizontal_symmetry => {
                        continue
                    }
                    _ => {}
                }
            }
            if !self.close_permitted(parent, df) {
                continue;
            }

            for s in 0..self.instance.stack_count() {
                let pos = parent.pos_stack[s];
                if pos >= self.instance.stack_size(s) {
                    continue;
                }
                if let Some(sp) = self.instance.stack_pred(s) {
                    if parent.pos_stack[sp] <= pos {
                        continue;
                    }
                }
                let j = match self.instance.stack_item(s, pos) {
                    Some(j) => j,
                    None => continue,
                };
                let item_type = self.instance.item_type(j);
                if !item_type.oriented {
                    let wide_first = item_type.rect.w <= item_type.rect.h;
                    self.insertion_item(parent, j, wide_first, df, &mut insertions);
                    self.insertion_item(parent, j, !wide_first, df, &mut insertions);
                } else {
                    self.insertion_item(parent, j, false, df, &mut insertions);
                }

                if parameters.cut_type == CutType::Roadef2018
                    && parameters.number_of_stages == Stages::Three
                {
                    self.pair_insertions(parent, s, j, df, &mut insertions);
                }
            }

            let ctx = self.bin_context(parent, df);
            let xs = self.x3_prev(parent, df, &ctx);
            let ys = self.y2_prev(parent, df, &ctx);
            for defect in ctx.defects() {
                if defect.right(ctx.o) > xs && defect.top(ctx.o) > ys {
                    self.insertion_defect(parent, defect, df, &mut insertions);
                }
            }
        }
        insertions
    }

    /// Checks the strip and subplate an insertion at `df` would close.
    fn close_permitted(&self, parent: &Node, df: Depth) -> bool {
        if parent.number_of_bins == 0 || df == 2 {
            return true;
        }
        let parameters = self.instance.parameters();
        let ctx = self.bin_context(parent, 2);
        // Closing a second-level subplate shorter than the minimum 2-cut
        // distance (unless it reaches the usable top).
        if parent.y2_curr < ctx.h_use
            && parent.y2_curr - parent.y2_prev < parameters.minimum_distance_2_cuts
        {
            return false;
        }
        if df >= 1 {
            return true;
        }
        // Closing a first-level strip narrower than the minimum 1-cut
        // distance (unless it reaches the usable right edge).
        if parent.x1_curr < ctx.w_use
            && parent.x1_curr - parent.x1_prev < parameters.minimum_distance_1_cuts
        {
            return false;
        }
        true
    }

    /// Pair partners for the two-item insertion: the next item of the same
    /// stack and the first available item of every later stack.
    fn pair_insertions(
        &self,
        parent: &Arc<Node>,
        s: usize,
        j: ItemTypeId,
        df: Depth,
        insertions: &mut Vec<Insertion>,
    ) {
        let mut partners: SmallVec<[ItemTypeId; 8]> = SmallVec::new();
        if let Some(j2) = self.instance.stack_item(s, parent.pos_stack[s] + 1) {
            partners.push(j2);
        }
        for s2 in (s + 1)..self.instance.stack_count() {
            let pos2 = parent.pos_stack[s2];
            if pos2 >= self.instance.stack_size(s2) {
                continue;
            }
            if let Some(sp) = self.instance.stack_pred(s2) {
                if parent.pos_stack[sp] <= pos2 {
                    continue;
                }
            }
            if let Some(j2) = self.instance.stack_item(s2, pos2) {
                partners.push(j2);
            }
        }
        let rotations = |j: ItemTypeId| -> SmallVec<[bool; 2]> {
            if self.instance.item_type(j).oriented {
                SmallVec::from_slice(&[false])
            } else {
                SmallVec::from_slice(&[false, true])
            }
        };
        let o = self.last_bin_orientation(parent, df);
        for &j2 in &partners {
            for &r1 in &rotations(j) {
                for &r2 in &rotations(j2) {
                    let w1 = self.instance.item_type(j).width(r1, o);
                    let w2 = self.instance.item_type(j2).width(r2, o);
                    if w1 == w2 {
                        self.insertion_two_items(parent, j, r1, j2, r2, df, insertions);
                    }
                }
            }
        }
    }

    fn push(&self, insertions: &mut Vec<Insertion>, insertion: Insertion) {
        // Square items produce the same insertion for both orientations.
        if !insertions.contains(&insertion) {
            insertions.push(insertion);
        }
    }

    /// Insertion of a single item, possibly floated above a defect.
    fn insertion_item(
        &self,
        parent: &Arc<Node>,
        j: ItemTypeId,
        rotate: bool,
        df: Depth,
        insertions: &mut Vec<Insertion>,
    ) {
        let parameters = self.instance.parameters();
        let thickness = parameters.cut_thickness;
        let min_waste = parameters.minimum_waste_length;
        let ctx = self.bin_context(parent, df);
        let bin_type_id = ctx.bin_type.id;
        let o = ctx.o;
        let item_type = self.instance.item_type(j);
        let w = item_type.width(rotate, o);
        let h = item_type.height(rotate, o);

        let xs = self.x3_prev(parent, df, &ctx);
        let ys = self.y2_prev(parent, df, &ctx);
        let xe = xs + w;
        if xe > ctx.w_use || ys + h > ctx.h_use {
            return;
        }
        if parameters.cut_type == CutType::Homogenous && df == 2 {
            if let Some(j1) = parent.item_type_id_1 {
                if j1 != j {
                    return;
                }
            }
        }

        // Defect under the item: float it above (ROADEF and non-exact
        // patterns only).
        let mut above_defect = false;
        let mut y_item = ys;
        if self
            .instance
            .item_intersects_defect(xs, ys, item_type, rotate, bin_type_id, o)
            .is_some()
        {
            if !matches!(
                parameters.cut_type,
                CutType::Roadef2018 | CutType::NonExact
            ) {
                return;
            }
            above_defect = true;
            let base = if ys == ctx.bottom { ctx.bottom_base } else { ys };
            loop {
                if let Some(k) = self
                    .instance
                    .item_intersects_defect(xs, y_item, item_type, rotate, bin_type_id, o)
                {
                    y_item = self.instance.defect(bin_type_id, k).top(o);
                    continue;
                }
                if y_item > ys && y_item - thickness - base < min_waste {
                    y_item = base + min_waste + thickness;
                    continue;
                }
                if !parameters.cut_through_defects && y_item > ys && thickness > 0 {
                    // The 4-cut below the floating item.
                    if let Some(k) = ctx.defects().iter().find(|defect| {
                        defect.bottom(o) < y_item
                            && y_item - thickness < defect.top(o)
                            && defect.left(o) < xe
                            && xs < defect.right(o)
                    }) {
                        y_item = k.top(o) + thickness;
                        continue;
                    }
                }
                break;
            }
            if y_item + h > ctx.h_use {
                return;
            }
        }
        let ye = y_item + h;

        // Merge the 2-cut.
        let cur_y2 = (df == 2).then_some((parent.y2_curr, parent.z2));
        let edge_kind = if above_defect { EdgeKind::Waste } else { EdgeKind::Item };
        let (mut y2, mut z2) = match advance_cut(cur_y2, ye, edge_kind, thickness, min_waste) {
            Some(v) => v,
            None => return,
        };
        let exact = matches!(parameters.cut_type, CutType::Exact | CutType::Homogenous);
        if exact && y2 != ye {
            return;
        }

        // Merge the 1-cut.
        let cur_x1 = (df >= 1).then_some((parent.x1_curr, parent.z1));
        let (mut x1, mut z1) = match advance_cut(cur_x1, xe, EdgeKind::Item, thickness, min_waste) {
            Some(v) => v,
            None => return,
        };
        if parameters.number_of_stages == Stages::Two && exact && x1 != xe {
            return;
        }

        let x1_prev = self.x1_prev(parent, df, &ctx);
        if !self.settle_cuts(
            &ctx, x1_prev, &mut x1, &mut z1, &mut y2, &mut z2, thickness, min_waste,
        ) {
            return;
        }
        if exact && y2 != ye {
            return;
        }

        if !parameters.cut_through_defects {
            // The 3-cut at the item's right edge cannot move: crossing a
            // defect kills the insertion.
            let y_bottom = self.y2_prev(parent, df, &ctx);
            if ctx.defects().iter().any(|defect| {
                defect.left(o) < xe + thickness
                    && xe < defect.right(o)
                    && defect.bottom(o) < y2
                    && y_bottom < defect.top(o)
            }) {
                return;
            }
            // The 4-cut above a bottom item.
            if !above_defect && y2 > ye {
                if ctx.defects().iter().any(|defect| {
                    defect.bottom(o) < ye + thickness
                        && ye < defect.top(o)
                        && defect.left(o) < xe
                        && xs < defect.right(o)
                }) {
                    return;
                }
            }
        }

        if df == 2 && !self.above_defect_items_clear(parent, y2, &ctx) {
            return;
        }

        let (x1_max, y2_max) = match self.cut_maxima(parent, df, &ctx, x1, y2, xe) {
            Some(v) => v,
            None => return,
        };
        if x1 > x1_max || y2 > y2_max {
            return;
        }
        if !self.fits_end(x1, ctx.w_use, ctx.w_end) || !self.fits_end(y2, ctx.h_use, ctx.h_end) {
            return;
        }

        // A subplate reaching the usable top of a fresh strip encodes the
        // same pattern as the matching new-strip insertion.
        if df == 2
            && y2 == ctx.h_use
            && parent.y2_prev == ctx.bottom
            && parent.x3_curr == parent.x1_curr
        {
            return;
        }

        let (item_type_id_1, item_type_id_2) = if above_defect {
            (None, Some(j))
        } else {
            (Some(j), None)
        };
        self.push(
            insertions,
            Insertion {
                item_type_id_1,
                item_type_id_2,
                df,
                x1,
                y2,
                x3: xe,
                x1_max,
                y2_max,
                z1,
                z2: if exact { 2 } else { z2 },
            },
        );
    }

    /// Insertion of two stacked items of equal width filling their subplate.
    fn insertion_two_items(
        &self,
        parent: &Arc<Node>,
        j1: ItemTypeId,
        rotate1: bool,
        j2: ItemTypeId,
        rotate2: bool,
        df: Depth,
        insertions: &mut Vec<Insertion>,
    ) {
        let parameters = self.instance.parameters();
        let thickness = parameters.cut_thickness;
        let min_waste = parameters.minimum_waste_length;
        let ctx = self.bin_context(parent, df);
        let o = ctx.o;
        let bin_type_id = ctx.bin_type.id;
        let item_1 = self.instance.item_type(j1);
        let item_2 = self.instance.item_type(j2);
        let w = item_1.width(rotate1, o);
        let h1 = item_1.height(rotate1, o);
        let h2 = item_2.height(rotate2, o);

        let xs = self.x3_prev(parent, df, &ctx);
        let ys = self.y2_prev(parent, df, &ctx);
        let xe = xs + w;
        let ye = ys + h1 + thickness + h2;
        if xe > ctx.w_use || ye > ctx.h_use {
            return;
        }
        if self
            .instance
            .item_intersects_defect(xs, ys, item_1, rotate1, bin_type_id, o)
            .is_some()
            || self
                .instance
                .item_intersects_defect(xs, ys + h1 + thickness, item_2, rotate2, bin_type_id, o)
                .is_some()
        {
            return;
        }

        let cur_y2 = (df == 2).then_some((parent.y2_curr, parent.z2));
        let (y2, _) = match advance_cut(cur_y2, ye, EdgeKind::Item, thickness, min_waste) {
            Some(v) => v,
            None => return,
        };
        // The pair fills its subplate exactly.
        if y2 != ye {
            return;
        }
        let mut y2 = y2;
        let mut z2 = 2;

        let cur_x1 = (df >= 1).then_some((parent.x1_curr, parent.z1));
        let (mut x1, mut z1) = match advance_cut(cur_x1, xe, EdgeKind::Item, thickness, min_waste) {
            Some(v) => v,
            None => return,
        };
        let x1_prev = self.x1_prev(parent, df, &ctx);
        if !self.settle_cuts(
            &ctx, x1_prev, &mut x1, &mut z1, &mut y2, &mut z2, thickness, min_waste,
        ) {
            return;
        }
        if y2 != ye {
            return;
        }

        if !parameters.cut_through_defects {
            let y_bottom = ys;
            let crossing = ctx.defects().iter().any(|defect| {
                // The 3-cut on the right and the 4-cut between the items.
                (defect.left(o) < xe + thickness
                    && xe < defect.right(o)
                    && defect.bottom(o) < y2
                    && y_bottom < defect.top(o))
                    || (defect.bottom(o) < ys + h1 + thickness
                        && ys + h1 < defect.top(o)
                        && defect.left(o) < xe
                        && xs < defect.right(o))
            });
            if crossing {
                return;
            }
        }
        if df == 2 && !self.above_defect_items_clear(parent, y2, &ctx) {
            return;
        }

        let (x1_max, y2_max) = match self.cut_maxima(parent, df, &ctx, x1, y2, xe) {
            Some(v) => v,
            None => return,
        };
        if x1 > x1_max || y2 > y2_max {
            return;
        }
        if !self.fits_end(x1, ctx.w_use, ctx.w_end) || !self.fits_end(y2, ctx.h_use, ctx.h_end) {
            return;
        }

        self.push(
            insertions,
            Insertion {
                item_type_id_1: Some(j1),
                item_type_id_2: Some(j2),
                df,
                x1,
                y2,
                x3: xe,
                x1_max,
                y2_max,
                z1,
                z2: 2,
            },
        );
    }

    /// Insertion of a pure waste subplate covering a defect.
    fn insertion_defect(
        &self,
        parent: &Arc<Node>,
        defect: &Defect,
        df: Depth,
        insertions: &mut Vec<Insertion>,
    ) {
        let parameters = self.instance.parameters();
        let thickness = parameters.cut_thickness;
        let min_waste = parameters.minimum_waste_length;
        let ctx = self.bin_context(parent, df);
        let o = ctx.o;

        let xs = self.x3_prev(parent, df, &ctx);
        let ys = self.y2_prev(parent, df, &ctx);
        let base_x = if xs == ctx.left { ctx.left_base } else { xs };
        let base_y = if ys == ctx.bottom { ctx.bottom_base } else { ys };

        let mut x3 = defect.right(o);
        let mut y2_target = defect.top(o);
        if x3 - base_x < min_waste {
            x3 = base_x + min_waste;
        }
        if y2_target - base_y < min_waste {
            y2_target = base_y + min_waste;
        }
        if !parameters.cut_through_defects {
            // Slide the 3-cut and the 2-cut target past any defect their
            // bands would cross.
            loop {
                if let Some(k) = ctx.defects().iter().find(|k| {
                    k.left(o) < x3 + thickness
                        && x3 < k.right(o)
                        && k.bottom(o) < y2_target
                        && ys < k.top(o)
                }) {
                    x3 = k.right(o).max(base_x + min_waste);
                    continue;
                }
                if let Some(k) = ctx.defects().iter().find(|k| {
                    k.bottom(o) < y2_target + thickness
                        && y2_target < k.top(o)
                        && k.left(o) < x3
                        && xs < k.right(o)
                }) {
                    y2_target = k.top(o).max(base_y + min_waste);
                    continue;
                }
                break;
            }
        }
        if x3 > ctx.w_use || y2_target > ctx.h_use {
            return;
        }

        let cur_y2 = (df == 2).then_some((parent.y2_curr, parent.z2));
        let (mut y2, mut z2) =
            match advance_cut(cur_y2, y2_target, EdgeKind::Waste, thickness, min_waste) {
                Some(v) => v,
                None => return,
            };
        let cur_x1 = (df >= 1).then_some((parent.x1_curr, parent.z1));
        let (mut x1, mut z1) = match advance_cut(cur_x1, x3, EdgeKind::Waste, thickness, min_waste)
        {
            Some(v) => v,
            None => return,
        };
        let x1_prev = self.x1_prev(parent, df, &ctx);
        if !self.settle_cuts(
            &ctx, x1_prev, &mut x1, &mut z1, &mut y2, &mut z2, thickness, min_waste,
        ) {
            return;
        }
        if df == 2 && !self.above_defect_items_clear(parent, y2, &ctx) {
            return;
        }

        let (x1_max, y2_max) = match self.cut_maxima(parent, df, &ctx, x1, y2, x3) {
            Some(v) => v,
            None => return,
        };
        if x1 > x1_max || y2 > y2_max {
            return;
        }
        if !self.fits_end(x1, ctx.w_use, ctx.w_end) || !self.fits_end(y2, ctx.h_use, ctx.h_end) {
            return;
        }

        self.push(
            insertions,
            Insertion {
                item_type_id_1: None,
                item_type_id_2: None,
                df,
                x1,
                y2,
                x3,
                x1_max,
                y2_max,
                z1,
                z2,
            },
        );
    }

    /// Slides the 1-cut and 2-cut past defects their bands cross, to a
    /// fixpoint. Returns `false` when a pinned cut cannot clear a defect.
    #[allow(clippy::too_many_arguments)]
    fn settle_cuts(
        &self,
        ctx: &BinContext<'_>,
        x1_prev: Length,
        x1: &mut Length,
        z1: &mut u8,
        y2: &mut Length,
        z2: &mut u8,
        thickness: Length,
        min_waste: Length,
    ) -> bool {
        if self.instance.parameters().cut_through_defects {
            return true;
        }
        let o = ctx.o;
        loop {
            // 1-cuts span the full bin height.
            if let Some(k) = ctx
                .defects()
                .iter()
                .find(|k| k.left(o) < *x1 + thickness && *x1 < k.right(o))
            {
                match advance_cut(
                    Some((*x1, *z1)),
                    k.right(o),
                    EdgeKind::Waste,
                    thickness,
                    min_waste,
                ) {
                    Some((position, z)) => {
                        *x1 = position;
                        *z1 = z;
                    }
                    None => return false,
                }
                continue;
            }
            // 2-cuts span the current strip.
            if let Some(k) = ctx.defects().iter().find(|k| {
                k.bottom(o) < *y2 + thickness
                    && *y2 < k.top(o)
                    && k.left(o) < *x1
                    && x1_prev < k.right(o)
            }) {
                match advance_cut(
                    Some((*y2, *z2)),
                    k.top(o),
                    EdgeKind::Waste,
                    thickness,
                    min_waste,
                ) {
                    Some((position, z)) => {
                        *y2 = position;
                        *z2 = z;
                    }
                    None => return false,
                }
                continue;
            }
            return true;
        }
    }

    /// Re-checks items floating above defects after the 2-cut moved to `y2`:
    /// neither the item nor its lifted bottom 4-cut may meet a defect.
    fn above_defect_items_clear(&self, parent: &Node, y2: Length, ctx: &BinContext<'_>) -> bool {
        if y2 == parent.y2_curr {
            return true;
        }
        let parameters = self.instance.parameters();
        let thickness = parameters.cut_thickness;
        parent.above_defect_items.iter().all(|record| {
            let item_type = self.instance.item_type(record.item_type_id);
            let w = item_type.width(record.rotate, ctx.o);
            let h = item_type.height(record.rotate, ctx.o);
            if self
                .instance
                .item_intersects_defect(
                    record.x,
                    y2 - h,
                    item_type,
                    record.rotate,
                    ctx.bin_type.id,
                    ctx.o,
                )
                .is_some()
            {
                return false;
            }
            parameters.cut_through_defects
                || !ctx.defects().iter().any(|defect| {
                    defect.bottom(ctx.o) < y2 - h
                        && y2 - h - thickness < defect.top(ctx.o)
                        && defect.left(ctx.o) < record.x + w
                        && record.x < defect.right(ctx.o)
                })
        })
    }

    /// Maximum cut positions after the insertion: inherited bounds tightened
    /// by defects the frozen cut bands would cross.
    fn cut_maxima(
        &self,
        parent: &Node,
        df: Depth,
        ctx: &BinContext<'_>,
        x1: Length,
        y2: Length,
        x3: Length,
    ) -> Option<(Length, Length)> {
        let parameters = self.instance.parameters();
        let thickness = parameters.cut_thickness;
        let o = ctx.o;
        let mut x1_max = self.x1_max_initial(parent, df, ctx);
        let mut y2_max = self.y2_max_initial(parent, df, ctx);
        if parameters.cut_through_defects {
            return Some((x1_max, y2_max));
        }
        let x1_prev = self.x1_prev(parent, df, ctx);
        // Extending the 2-cut would stretch the 3-cut at `x3` upward: cap it
        // below any defect sitting in the 3-cut band.
        for defect in ctx.defects() {
            if defect.left(o) < x3 + thickness && x3 < defect.right(o) && defect.bottom(o) >= y2 {
                y2_max = y2_max.min(defect.bottom(o) - thickness);
            }
        }
        // A subplate opened at depth 1 froze the 2-cut below it; extending
        // the 1-cut would stretch that frozen band across defects.
        if df == 1 {
            let frozen_bottom = parent.y2_curr;
            let frozen_top = parent.y2_curr + thickness;
            for defect in ctx.defects() {
                if defect.bottom(o) < frozen_top
                    && frozen_bottom < defect.top(o)
                    && defect.right(o) > x1_prev
                {
                    x1_max = x1_max.min(defect.left(o) - thickness);
                }
            }
        }
        (x1 <= x1_max && y2 <= y2_max).then_some((x1_max, y2_max))
    }

    /// End-of-container rule: a cut below the usable end must leave a legal
    /// waste strip, measured to the physical edge under a soft trim.
    fn fits_end(&self, position: Length, usable_end: Length, outer_end: Length) -> bool {
        let parameters = self.instance.parameters();
        if position >= usable_end {
            return position == usable_end;
        }
        if parameters.minimum_waste_length == 0 {
            return true;
        }
        position + parameters.cut_thickness + parameters.minimum_waste_length <= outer_end
    }

    /// Builds the child node of `parent` for `insertion`.
    pub fn child(&self, parent: &Arc<Node>, insertion: &Insertion) -> Arc<Node> {
        let df = insertion.df;
        let ctx = self.bin_context(parent, df);
        let bin_pos = self.last_bin_pos(parent, df);
        let x1_prev = self.x1_prev(parent, df, &ctx);
        let y2_prev = self.y2_prev(parent, df, &ctx);
        let x3_prev = self.x3_prev(parent, df, &ctx);

        let mut pos_stack = parent.pos_stack.clone();
        let mut number_of_items = parent.number_of_items;
        let mut item_area = parent.item_area;
        let mut profit = parent.profit;
        let mut cost = parent.cost;
        let number_of_bins = if df < 0 {
            cost += ctx.bin_type.cost;
            parent.number_of_bins + 1
        } else {
            parent.number_of_bins
        };
        for j in [insertion.item_type_id_1, insertion.item_type_id_2]
            .into_iter()
            .flatten()
        {
            let item_type = self.instance.item_type(j);
            pos_stack[item_type.stack_id] += 1;
            number_of_items += 1;
            item_area += item_type.rect.area();
            profit += item_type.profit;
        }

        let mut above_defect_items = if df == 2 {
            parent.above_defect_items.clone()
        } else {
            SmallVec::new()
        };
        if insertion.item_type_id_1.is_none() {
            if let Some(j) = insertion.item_type_id_2 {
                let item_type = self.instance.item_type(j);
                let rotate = item_type.width(false, ctx.o) != insertion.x3 - x3_prev;
                above_defect_items.push(AboveDefectItem {
                    item_type_id: j,
                    rotate,
                    x: x3_prev,
                });
            }
        }

        let previous_bins = self.instance.previous_bin_area(bin_pos);
        let full = number_of_items == self.instance.item_count();
        let current_area = if full {
            previous_bins + (insertion.x1 - ctx.left) * (ctx.h_use - ctx.bottom)
        } else {
            previous_bins
                + (x1_prev - ctx.left) * (ctx.h_use - ctx.bottom)
                + (insertion.x1 - x1_prev) * (y2_prev - ctx.bottom)
                + (insertion.x3 - x1_prev) * (insertion.y2 - y2_prev)
        };

        Arc::new(Node {
            id: self.next_id(),
            parent: Some(parent.clone()),
            item_type_id_1: insertion.item_type_id_1,
            item_type_id_2: insertion.item_type_id_2,
            df,
            x1_curr: insertion.x1,
            x1_prev,
            y2_curr: insertion.y2,
            y2_prev,
            x3_curr: insertion.x3,
            x1_max: insertion.x1_max,
            y2_max: insertion.y2_max,
            z1: insertion.z1,
            z2: insertion.z2,
            pos_stack,
            number_of_bins,
            first_stage_orientation: self.last_bin_orientation(parent, df),
            number_of_items,
            item_area,
            current_area,
            waste: current_area - item_area,
            profit,
            cost,
            above_defect_items,
        })
    }

    /*
     * Objective helpers
     */

    fn full(&self, node: &Node) -> bool {
        node.number_of_items == self.instance.item_count()
    }

    /// Knapsack upper bound: the current profit plus the remaining packable
    /// area filled with the most efficient item type.
    fn ubkp(&self, node: &Node) -> Profit {
        let remaining_item_area = self.instance.item_area() - node.item_area;
        let remaining_packable = self.instance.packable_area() - node.current_area;
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

    fn width(&self, node: &Node) -> Length {
        node.x1_curr
    }

    fn height(&self, node: &Node) -> Length {
        node.y2_curr.max(
            match node.first_stage_orientation {
                CutOrientation::Vertical => 0,
                CutOrientation::Horizontal => node.x1_curr,
            },
        )
    }

    fn front(&self, node: &Node) -> Front {
        Front {
            bins: node.number_of_bins,
            o: node.first_stage_orientation,
            x1_prev: node.x1_prev,
            x3_curr: node.x3_curr,
            x1_curr: node.x1_curr,
            y2_prev: node.y2_prev,
            y2_curr: node.y2_curr,
        }
    }

    fn front_dominates(&self, f1: &Front, f2: &Front, h_use: Length) -> bool {
        if f1.bins < f2.bins {
            return true;
        }
        if f1.bins != f2.bins || f1.o != f2.o {
            return false;
        }
        if f1.x1_curr <= f2.x1_prev {
            return true;
        }
        if f1.x1_prev <= f2.x1_prev && f1.x1_curr <= f2.x1_curr && f1.y2_curr <= f2.y2_prev {
            return true;
        }
        if f1.y2_curr != h_use
            && f1.x1_prev <= f2.x1_prev
            && f1.x3_curr <= f2.x3_curr
            && f1.x1_curr <= f2.x1_curr
            && f1.y2_prev <= f2.y2_prev
            && f1.y2_curr <= f2.y2_curr
        {
            return true;
        }
        if f2.y2_curr == h_use
            && f1.x1_prev >= f2.x1_prev
            && f1.x3_curr <= f2.x3_curr
            && f1.x1_curr <= f2.x1_curr
            && f1.y2_prev <= f2.y2_prev
            && f1.y2_curr <= f2.y2_curr
        {
            return true;
        }
        if f1.y2_curr != h_use
            && f2.y2_curr == h_use
            && f1.x3_curr <= f2.x3_curr
            && f1.x1_curr <= f2.x1_curr
            && f1.y2_prev <= f2.y2_prev
            && f1.y2_curr <= f2.y2_curr
        {
            return true;
        }
        false
    }

    fn last_insertion_defect(&self, node: &Node) -> bool {
        node.number_of_bins > 0
            && node.item_type_id_1.is_none()
            && node.item_type_id_2.is_none()
    }

    /*
     * Materialization
     */

    /// Walks from `node` up to the root and emits the flat cut tree with
    /// literal coordinates.
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

        let thickness = self.instance.parameters().cut_thickness;
        let mut bins: Vec<SolutionBin> = Vec::new();
        let mut builder: Option<BinAccumulator> = None;
        for (index, n) in chain.iter().enumerate() {
            let df = n.df;
            if df < 0 {
                if let Some(done) = builder.take() {
                    bins.push(done.finish(self, false));
                }
                let o = n.first_stage_orientation;
                let bin_type_id = self.instance.bin_type_id_at(n.number_of_bins - 1);
                builder = Some(BinAccumulator::new(self.instance.bin_type(bin_type_id), o));
            }
            let acc = builder.as_mut().expect("insertion before any bin");
            match df {
                0 => acc.open_strip(n.x1_prev, thickness),
                1 => acc.open_subplate(n.y2_prev, thickness),
                _ => {}
            }
            let x3_start = if df == 2 {
                chain[index - 1].x3_curr + thickness
            } else {
                n.x1_prev
            };
            acc.push_subplate(n, x3_start);
            acc.x1_final = n.x1_curr;
            acc.y2_final = n.y2_curr;
        }
        if let Some(done) = builder.take() {
            bins.push(done.finish(self, true));
        }
        Solution::from_bins(self.instance, bins)
    }
}

/// Frontier summary used by the dominance rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Front {
    bins: usize,
    o: CutOrientation,
    x1_prev: Length,
    x3_curr: Length,
    x1_curr: Length,
    y2_prev: Length,
    y2_curr: Length,
}

/// Third-level subplate being accumulated during materialization.
struct Sub3 {
    x_start: Length,
    x_end: Length,
    content: Sub3Content,
}

enum Sub3Content {
    Waste,
    One { item: ItemTypeId, at_top: bool },
    Two { bottom: ItemTypeId, top: ItemTypeId },
}

struct Sub2 {
    y_start: Length,
    y_end: Length,
    subplates: Vec<Sub3>,
}

struct Strip {
    x_start: Length,
    x_end: Length,
    subplates: Vec<Sub2>,
}

struct BinAccumulator {
    bin_type_id: usize,
    o: CutOrientation,
    w_phys: Length,
    h_phys: Length,
    w_use: Length,
    h_use: Length,
    bottom: Length,
    strips: Vec<Strip>,
    x1_final: Length,
    y2_final: Length,
}

impl BinAccumulator {
    fn new(bin_type: &BinType, o: CutOrientation) -> Self {
        let ctx = BinContext::new(bin_type, o);
        BinAccumulator {
            bin_type_id: bin_type.id,
            o,
            w_phys: bin_type.width(o),
            h_phys: bin_type.height(o),
            w_use: ctx.w_use,
            h_use: ctx.h_use,
            bottom: ctx.bottom,
            strips: vec![Strip {
                x_start: ctx.left,
                x_end: 0,
                subplates: vec![Sub2 {
                    y_start: ctx.bottom,
                    y_end: 0,
                    subplates: Vec::new(),
                }],
            }],
            x1_final: 0,
            y2_final: 0,
        }
    }

    fn open_strip(&mut self, x_start: Length, thickness: Length) {
        self.close_subplate();
        let strip = self.strips.last_mut().unwrap();
        strip.x_end = x_start - thickness;
        self.strips.push(Strip {
            x_start,
            x_end: 0,
            subplates: vec![Sub2 {
                y_start: self.bottom,
                y_end: 0,
                subplates: Vec::new(),
            }],
        });
    }

    fn open_subplate(&mut self, y_start: Length, _thickness: Length) {
        self.close_subplate();
        let strip = self.strips.last_mut().unwrap();
        strip.subplates.push(Sub2 {
            y_start,
            y_end: 0,
            subplates: Vec::new(),
        });
    }

    fn close_subplate(&mut self) {
        let strip = self.strips.last_mut().unwrap();
        if let Some(sub2) = strip.subplates.last_mut() {
            sub2.y_end = self.y2_final.max(sub2.y_start);
        }
    }

    fn push_subplate(&mut self, node: &Node, x_start: Length) {
        let content = match (node.item_type_id_1, node.item_type_id_2) {
            (None, None) => Sub3Content::Waste,
            (Some(item), None) => Sub3Content::One {
                item,
                at_top: false,
            },
            (None, Some(item)) => Sub3Content::One { item, at_top: true },
            (Some(bottom), Some(top)) => Sub3Content::Two { bottom, top },
        };
        let sub2 = self
            .strips
            .last_mut()
            .unwrap()
            .subplates
            .last_mut()
            .unwrap();
        sub2.subplates.push(Sub3 {
            x_start,
            x_end: node.x3_curr,
            content,
        });
    }

    fn finish(mut self, scheme: &StagedScheme<'_>, last_bin: bool) -> SolutionBin {
        let thickness = scheme.instance.parameters().cut_thickness;
        self.close_subplate();
        self.strips.last_mut().unwrap().x_end = self.x1_final;

        let o = self.o;
        let map = |l: Length, r: Length, b: Length, t: Length| -> (Length, Length, Length, Length) {
            match o {
                CutOrientation::Vertical => (l, r, b, t),
                CutOrientation::Horizontal => (b, t, l, r),
            }
        };
        let mut nodes: Vec<SolutionNode> = Vec::new();
        let (l, r, b, t) = map(0, self.w_phys, 0, self.h_phys);
        nodes.push(SolutionNode {
            parent: None,
            depth: 0,
            l,
            r,
            b,
            t,
            content: NodeContent::Branch,
        });
        let mut emit = |parent: usize,
                        depth: i32,
                        l0: Length,
                        r0: Length,
                        b0: Length,
                        t0: Length,
                        content: NodeContent,
                        nodes: &mut Vec<SolutionNode>|
         -> usize {
            let (l, r, b, t) = map(l0, r0, b0, t0);
            nodes.push(SolutionNode {
                parent: Some(parent),
                depth,
                l,
                r,
                b,
                t,
                content,
            });
            nodes.len() - 1
        };

        for strip in &self.strips {
            let strip_node = emit(
                0,
                1,
                strip.x_start,
                strip.x_end,
                self.bottom,
                self.h_use,
                NodeContent::Branch,
                &mut nodes,
            );
            for sub2 in &strip.subplates {
                let sub2_node = emit(
                    strip_node,
                    2,
                    strip.x_start,
                    strip.x_end,
                    sub2.y_start,
                    sub2.y_end,
                    NodeContent::Branch,
                    &mut nodes,
                );
                let mut cursor = strip.x_start;
                let last = sub2.subplates.len() - 1;
                for (position, sub3) in sub2.subplates.iter().enumerate() {
                    cursor = sub3.x_end;
                    let span = sub2.y_end - sub2.y_start;
                    match sub3.content {
                        Sub3Content::Waste => {
                            // A trailing pure-waste subplate needs no cut
                            // against the strip leftover: merge them.
                            let x_end = if position == last {
                                cursor = strip.x_end;
                                strip.x_end
                            } else {
                                sub3.x_end
                            };
                            emit(
                                sub2_node,
                                3,
                                sub3.x_start,
                                x_end,
                                sub2.y_start,
                                sub2.y_end,
                                NodeContent::Waste,
                                &mut nodes,
                            );
                        }
                        Sub3Content::One { item, at_top, .. } => {
                            let item_type = scheme.instance.item_type(item);
                            let w = sub3.x_end - sub3.x_start;
                            let h = if item_type.width(false, o) == w {
                                item_type.height(false, o)
                            } else {
                                item_type.height(true, o)
                            };
                            if h == span {
                                emit(
                                    sub2_node,
                                    3,
                                    sub3.x_start,
                                    sub3.x_end,
                                    sub2.y_start,
                                    sub2.y_end,
                                    NodeContent::Item(item),
                                    &mut nodes,
                                );
                            } else {
                                let sub3_node = emit(
                                    sub2_node,
                                    3,
                                    sub3.x_start,
                                    sub3.x_end,
                                    sub2.y_start,
                                    sub2.y_end,
                                    NodeContent::Branch,
                                    &mut nodes,
                                );
                                if at_top {
                                    let item_bottom = sub2.y_end - h;
                                    if item_bottom - thickness > sub2.y_start {
                                        emit(
                                            sub3_node,
                                            4,
                                            sub3.x_start,
                                            sub3.x_end,
                                            sub2.y_start,
                                            item_bottom - thickness,
                                            NodeContent::Waste,
                                            &mut nodes,
                                        );
                                    }
                                    emit(
                                        sub3_node,
                                        4,
                                        sub3.x_start,
                                        sub3.x_end,
                                        item_bottom,
                                        sub2.y_end,
                                        NodeContent::Item(item),
                                        &mut nodes,
                                    );
                                } else {
                                    emit(
                                        sub3_node,
                                        4,
                                        sub3.x_start,
                                        sub3.x_end,
                                        sub2.y_start,
                                        sub2.y_start + h,
                                        NodeContent::Item(item),
                                        &mut nodes,
                                    );
                                    let waste_bottom = sub2.y_start + h + thickness;
                                    if waste_bottom < sub2.y_end {
                                        emit(
                                            sub3_node,
                                            4,
                                            sub3.x_start,
                                            sub3.x_end,
                                            waste_bottom,
                                            sub2.y_end,
                                            NodeContent::Waste,
                                            &mut nodes,
                                        );
                                    }
                                }
                            }
                        }
                        Sub3Content::Two { bottom, top } => {
                            let w = sub3.x_end - sub3.x_start;
                            let height_of = |item: ItemTypeId| {
                                let item_type = scheme.instance.item_type(item);
                                if item_type.width(false, o) == w {
                                    item_type.height(false, o)
                                } else {
                                    item_type.height(true, o)
                                }
                            };
                            let h1 = height_of(bottom);
                            let sub3_node = emit(
                                sub2_node,
                                3,
                                sub3.x_start,
                                sub3.x_end,
                                sub2.y_start,
                                sub2.y_end,
                                NodeContent::Branch,
                                &mut nodes,
                            );
                            emit(
                                sub3_node,
                                4,
                                sub3.x_start,
                                sub3.x_end,
                                sub2.y_start,
                                sub2.y_start + h1,
                                NodeContent::Item(bottom),
                                &mut nodes,
                            );
                            emit(
                                sub3_node,
                                4,
                                sub3.x_start,
                                sub3.x_end,
                                sub2.y_start + h1 + thickness,
                                sub2.y_end,
                                NodeContent::Item(top),
                                &mut nodes,
                            );
                        }
                    }
                }
                // Trailing waste right of the last third-level subplate.
                if cursor + thickness < strip.x_end {
                    emit(
                        sub2_node,
                        3,
                        cursor + thickness,
                        strip.x_end,
                        sub2.y_start,
                        sub2.y_end,
                        NodeContent::Waste,
                        &mut nodes,
                    );
                }
            }
            // Trailing waste above the last second-level subplate.
            let top = strip.subplates.last().map(|s| s.y_end).unwrap_or(self.bottom);
            if top + thickness < self.h_use {
                emit(
                    strip_node,
                    2,
                    strip.x_start,
                    strip.x_end,
                    top + thickness,
                    self.h_use,
                    NodeContent::Waste,
                    &mut nodes,
                );
            }
        }
        // Trailing leftover right of the last strip.
        if self.x1_final + thickness < self.w_use {
            let content = if last_bin {
                NodeContent::Residual
            } else {
                NodeContent::Waste
            };
            let (l, r, b, t) = map(
                self.x1_final + thickness,
                self.w_use,
                self.bottom,
                self.h_use,
            );
            nodes.push(SolutionNode {
                parent: Some(0),
                depth: 1,
                l,
                r,
                b,
                t,
                content,
            });
        }

        SolutionBin {
            bin_type_id: self.bin_type_id,
            copies: 1,
            first_cut_orientation: o,
            nodes,
        }
    }
}

impl<'a> BranchingScheme for StagedScheme<'a> {
    type Node = Arc<Node>;

    fn instance(&self) -> &Instance {
        self.instance
    }

    fn root(&self) -> Arc<Node> {
        StagedScheme::root(self)
    }

    fn children(&self, parent: &Arc<Node>) -> Vec<Arc<Node>> {
        self.insertions(parent)
            .iter()
            .map(|insertion| self.child(parent, insertion))
            .collect()
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
                self.full(node) && (!self.full(best) || self.width(node) < self.width(best))
            }
            Objective::OpenDimensionY => {
                self.full(node) && (!self.full(best) || self.height(node) < self.height(best))
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
            Objective::OpenDimensionX => self.full(best) && self.width(node) >= self.width(best),
            Objective::OpenDimensionY => self.full(best) && self.height(node) >= self.height(best),
            Objective::VariableSizedBinPacking => {
                self.full(best) && !strictly_greater(best.cost, node.cost)
            }
        }
    }

    fn guide(&self, node: &Arc<Node>) -> GuideKey {
        let area = node.current_area as f64;
        let item_area = node.item_area as f64;
        let id = node.id;
        match self.parameters.guide {
            1 => {
                let mut waste_rate = (area - item_area) / area;
                if waste_rate < 0.02 {
                    waste_rate = 0.01 + waste_rate / 2.0;
                }
                GuideKey::single(
                    waste_rate / item_area * node.number_of_items as f64,
                    id,
                )
            }
            4 => GuideKey::single(area / node.profit, id),
            5 => GuideKey::single(
                area / node.profit / item_area * node.number_of_items as f64,
                id,
            ),
            6 => GuideKey::single(node.waste as f64, id),
            7 => GuideKey::single(-self.ubkp(node), id),
            8 => GuideKey {
                k0: -self.ubkp(node),
                k1: node.waste as f64,
                k2: 0.0,
                id,
            },
            _ => GuideKey::single(area / item_area, id),
        }
    }

    fn comparable(&self, node: &Arc<Node>) -> bool {
        !self.last_insertion_defect(node)
    }

    fn dominates(&self, node: &Arc<Node>, other: &Arc<Node>) -> bool {
        let f1 = self.front(node);
        let f2 = self.front(other);
        let h_use = if node.number_of_bins > 0 {
            let ctx = self.bin_context(node, 2);
            ctx.h_use
        } else {
            0
        };
        self.front_dominates(&f1, &f2, h_use)
    }

    fn bucket_key(&self, node: &Arc<Node>) -> BucketKey {
        node.pos_stack.iter().copied().collect()
    }

    fn proves_optimal(&self, best: &Arc<Node>) -> bool {
        self.instance.objective() == Objective::BinPacking
            && self.full(best)
            && best.number_of_bins <= self.bin_lower_bound
    }

    fn to_solution(&self, node: &Arc<Node>) -> Solution {
        StagedScheme::to_solution(self, node)
    }
}
