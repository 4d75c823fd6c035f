//! Finished cutting patterns: the flat cut-tree representation, the
//! invariant validator, objective comparison, and the certificate CSV
//! writer/reader.

use crate::instance::{
    strictly_greater, strictly_lesser, Area, BinTypeId, CutOrientation, Instance, ItemTypeId,
    Length, Objective, Profit,
};
use crate::Error;

use std::fs;
use std::io::Write as _;
use std::path::Path;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Content of a solution node.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeContent {
    /// A placed item of the given type.
    Item(ItemTypeId),
    /// A pure waste rectangle.
    Waste,
    /// The trailing leftover of the final bin.
    Residual,
    /// An interior subplate with children.
    Branch,
}

impl NodeContent {
    /// Certificate CSV type code.
    pub fn code(self) -> i64 {
        match self {
            NodeContent::Item(j) => j as i64,
            NodeContent::Waste => -1,
            NodeContent::Residual => -2,
            NodeContent::Branch => -3,
        }
    }

    fn from_code(code: i64) -> Option<NodeContent> {
        match code {
            j if j >= 0 => Some(NodeContent::Item(j as ItemTypeId)),
            -1 => Some(NodeContent::Waste),
            -2 => Some(NodeContent::Residual),
            -3 => Some(NodeContent::Branch),
            _ => None,
        }
    }
}

/// One rectangle of the flat cut tree of a bin.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SolutionNode {
    /// Index of the parent node within the bin, if any.
    pub parent: Option<usize>,
    /// Cut depth: 0 for the bin, k for a stage-k subplate.
    pub depth: i32,
    /// Left coordinate.
    pub l: Length,
    /// Right coordinate.
    pub r: Length,
    /// Bottom coordinate.
    pub b: Length,
    /// Top coordinate.
    pub t: Length,
    /// What the rectangle holds.
    pub content: NodeContent,
}

impl SolutionNode {
    /// Width of the node.
    pub fn width(&self) -> Length {
        self.r - self.l
    }

    /// Height of the node.
    pub fn height(&self) -> Length {
        self.t - self.b
    }
}

/// The cut tree of one used bin.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct SolutionBin {
    /// Bin type of this bin.
    pub bin_type_id: BinTypeId,
    /// Number of identical copies of this pattern.
    pub copies: i64,
    /// Orientation of the first-stage cuts.
    pub first_cut_orientation: CutOrientation,
    /// Flat node list; node 0 is the bin rectangle.
    pub nodes: Vec<SolutionNode>,
}

/// A finished (possibly partial) cutting pattern with its indicators.
#[derive(Clone, Debug, Default)]
pub struct Solution {
    bins: Vec<SolutionBin>,
    number_of_bins: i64,
    number_of_items: i64,
    item_area: Area,
    profit: Profit,
    cost: Profit,
    full_area: Area,
    /// Used area: full bin area minus the trailing residual.
    area: Area,
    width: Length,
    height: Length,
    second_leftover_value: Area,
    item_copies: Vec<i64>,
    feasible: bool,
    violations: Vec<String>,
}

impl Solution {
    /// Builds a solution from bin patterns, computing indicators and running
    /// the full §4.3 validation. Violations indicate a kernel bug: they
    /// panic in debug builds and mark the solution infeasible in release.
    pub fn from_bins(instance: &Instance, bins: Vec<SolutionBin>) -> Solution {
        let mut solution = Solution {
            bins,
            item_copies: vec![0; instance.item_type_count()],
            feasible: true,
            ..Default::default()
        };
        for bin_pos in 0..solution.bins.len() {
            solution.update_indicators(instance, bin_pos);
        }
        solution.validate(instance);
        debug_assert!(
            solution.violations.is_empty(),
            "invalid solution produced by the branching scheme: {:?}",
            solution.violations
        );
        solution
    }

    /// Bin patterns of the solution.
    pub fn bins(&self) -> &[SolutionBin] {
        &self.bins
    }

    /// Total number of bins used (copies included).
    pub fn number_of_bins(&self) -> i64 {
        self.number_of_bins
    }

    /// Total number of packed items.
    pub fn number_of_items(&self) -> i64 {
        self.number_of_items
    }

    /// Copies packed of item type `j`.
    pub fn item_copies(&self, j: ItemTypeId) -> i64 {
        self.item_copies[j]
    }

    /// Total packed item area.
    pub fn item_area(&self) -> Area {
        self.item_area
    }

    /// Total packed profit.
    pub fn profit(&self) -> Profit {
        self.profit
    }

    /// Total cost of the used bins.
    pub fn cost(&self) -> Profit {
        self.cost
    }

    /// Total area of the used bins.
    pub fn full_area(&self) -> Area {
        self.full_area
    }

    /// Waste: used area minus item area, the trailing residual excluded.
    pub fn waste(&self) -> Area {
        self.area - self.item_area
    }

    /// Waste including the trailing residual.
    pub fn full_waste(&self) -> Area {
        self.full_area - self.item_area
    }

    /// Waste as a fraction of the used area.
    pub fn waste_percentage(&self) -> f64 {
        if self.area == 0 {
            0.0
        } else {
            self.waste() as f64 / self.area as f64
        }
    }

    /// Largest x-coordinate used by a non-residual node.
    pub fn width(&self) -> Length {
        self.width
    }

    /// Largest y-coordinate used by a non-residual node.
    pub fn height(&self) -> Length {
        self.height
    }

    /// Area of the final leftover, used to break waste ties.
    pub fn second_leftover_value(&self) -> Area {
        self.second_leftover_value
    }

    /// Returns whether every invariant check passed.
    pub fn feasible(&self) -> bool {
        self.feasible
    }

    /// Validation failures, empty for feasible solutions.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Returns whether all items of the instance are packed.
    pub fn full(&self, instance: &Instance) -> bool {
        self.number_of_items == instance.item_count()
    }

    /// Returns whether `self` is a strictly better candidate than `other`
    /// under the instance objective.
    pub fn better_than(&self, instance: &Instance, other: &Solution) -> bool {
        if !self.feasible {
            return false;
        }
        if !other.feasible {
            return true;
        }
        match instance.objective() {
            Objective::Default => {
                if strictly_greater(self.profit, other.profit) {
                    return true;
                }
                if strictly_lesser(self.profit, other.profit) {
                    return false;
                }
                self.waste() < other.waste()
            }
            Objective::BinPacking => {
                self.full(instance)
                    && (!other.full(instance) || self.number_of_bins < other.number_of_bins)
            }
            Objective::BinPackingWithLeftovers => {
                if !self.full(instance) {
                    return false;
                }
                if !other.full(instance) {
                    return true;
                }
                if self.waste() != other.waste() {
                    return self.waste() < other.waste();
                }
                self.second_leftover_value > other.second_leftover_value
            }
            Objective::OpenDimensionX => {
                self.full(instance) && (!other.full(instance) || self.width < other.width)
            }
            Objective::OpenDimensionY => {
                self.full(instance) && (!other.full(instance) || self.height < other.height)
            }
            Objective::Knapsack | Objective::SequentialOneDimensionalSub => {
                strictly_greater(self.profit, other.profit)
            }
            Objective::VariableSizedBinPacking => {
                self.full(instance)
                    && (!other.full(instance) || strictly_lesser(self.cost, other.cost))
            }
        }
    }

    fn update_indicators(&mut self, instance: &Instance, bin_pos: usize) {
        let bin = &self.bins[bin_pos];
        let bin_type = instance.bin_type(bin.bin_type_id);
        self.number_of_bins += bin.copies;
        self.cost += bin.copies as Profit * bin_type.cost;
        self.full_area += bin.copies * bin_type.area();
        self.area += bin.copies * bin_type.area();
        self.second_leftover_value = 0;
        for node in &bin.nodes {
            match node.content {
                NodeContent::Item(j) => {
                    let item_type = instance.item_type(j);
                    self.number_of_items += bin.copies;
                    self.item_area += bin.copies * item_type.rect.area();
                    self.profit += bin.copies as Profit * item_type.profit;
                    self.item_copies[j] += bin.copies;
                }
                NodeContent::Residual => {
                    self.area -= bin.copies * (node.width() * node.height());
                    if node.depth == 1 {
                        self.second_leftover_value = node.width() * node.height();
                    }
                }
                _ => {}
            }
            if node.depth > 0 && node.content != NodeContent::Residual {
                self.width = self.width.max(node.r);
                self.height = self.height.max(node.t);
            }
        }
    }

    fn report(&mut self, message: String) {
        tracing::error!("{}", message);
        self.violations.push(message);
        self.feasible = false;
    }

    /// Re-checks every placement and cut rule on the finished pattern.
    fn validate(&mut self, instance: &Instance) {
        let parameters = instance.parameters().clone();
        for bin_pos in 0..self.bins.len() {
            let bin = self.bins[bin_pos].clone();
            let bin_type = instance.bin_type(bin.bin_type_id);
            let o = bin.first_cut_orientation;

            // Item copy bounds and stack precedence are global; geometric
            // checks are per bin.
            let items: Vec<&SolutionNode> = bin
                .nodes
                .iter()
                .filter(|node| matches!(node.content, NodeContent::Item(_)))
                .collect();

            for node in &items {
                let inside = node.l >= bin_type.left_trim.length
                    && node.r <= bin_type.rect.w - bin_type.right_trim.length
                    && node.b >= bin_type.bottom_trim.length
                    && node.t <= bin_type.rect.h - bin_type.top_trim.length;
                if !inside {
                    self.report(format!(
                        "bin {}: item at ({}, {}, {}, {}) outside the trimmed bin",
                        bin_pos, node.l, node.r, node.b, node.t
                    ));
                }
            }

            for (i, a) in items.iter().enumerate() {
                for b in items.iter().skip(i + 1) {
                    if a.l < b.r && b.l < a.r && a.b < b.t && b.b < a.t {
                        self.report(format!(
                            "bin {}: overlapping items at ({}, {}) and ({}, {})",
                            bin_pos, a.l, a.b, b.l, b.b
                        ));
                    }
                }
            }

            for node in &items {
                if let NodeContent::Item(j) = node.content {
                    let item_type = instance.item_type(j);
                    if instance
                        .rect_intersects_defect(
                            node.l,
                            node.r,
                            node.b,
                            node.t,
                            bin.bin_type_id,
                            CutOrientation::Vertical,
                        )
                        .is_some()
                    {
                        self.report(format!("bin {}: item {} intersects a defect", bin_pos, j));
                    }
                    let dims = (node.width(), node.height());
                    let fits = dims == (item_type.rect.w, item_type.rect.h)
                        || (!item_type.oriented && dims == (item_type.rect.h, item_type.rect.w));
                    if !fits {
                        self.report(format!(
                            "bin {}: item {} has dimensions {}x{}",
                            bin_pos,
                            j,
                            node.width(),
                            node.height()
                        ));
                    }
                }
            }

            // Minimum waste length on explicit waste rectangles.
            for node in &bin.nodes {
                if node.depth >= 1 && node.content == NodeContent::Waste {
                    let minimum = parameters.minimum_waste_length;
                    if node.width() < minimum || node.height() < minimum {
                        // Waste holding a defect is exempt; so are border
                        // slivers reaching a soft-trimmed physical edge.
                        let has_defect = instance
                            .rect_intersects_defect(
                                node.l,
                                node.r,
                                node.b,
                                node.t,
                                bin.bin_type_id,
                                CutOrientation::Vertical,
                            )
                            .is_some();
                        let soft_edge = touches_soft_edge(node, bin_type);
                        if !has_defect && !soft_edge {
                            self.report(format!(
                                "bin {}: waste of {}x{} below the minimum waste length",
                                bin_pos,
                                node.width(),
                                node.height()
                            ));
                        }
                    }
                }
            }

            // 1-cut distances on depth-1 strips. The trailing residual and
            // strips flush with the usable edge are exempt from the minimum.
            let usable_right = bin_type.rect.w - bin_type.right_trim.length;
            let usable_top = bin_type.rect.h - bin_type.top_trim.length;
            for node in &bin.nodes {
                if node.depth != 1 {
                    continue;
                }
                let (extent, flush) = match o {
                    CutOrientation::Vertical => (node.width(), node.r == usable_right),
                    CutOrientation::Horizontal => (node.height(), node.t == usable_top),
                };
                if node.content != NodeContent::Residual
                    && !flush
                    && extent < parameters.minimum_distance_1_cuts
                {
                    self.report(format!(
                        "bin {}: first-stage strip of width {} below the minimum",
                        bin_pos, extent
                    ));
                }
                if let Some(maximum) = parameters.maximum_distance_1_cuts {
                    if extent > maximum && node.content == NodeContent::Branch {
                        self.report(format!(
                            "bin {}: first-stage strip of width {} above the maximum",
                            bin_pos, extent
                        ));
                    }
                }
            }

            // 2-cut minimum distance on depth-2 branches; subplates flush
            // with the usable top are exempt.
            for node in &bin.nodes {
                if node.depth == 2 && node.content == NodeContent::Branch {
                    let (extent, flush) = match o {
                        CutOrientation::Vertical => (node.height(), node.t == usable_top),
                        CutOrientation::Horizontal => (node.width(), node.r == usable_right),
                    };
                    if !flush && extent < parameters.minimum_distance_2_cuts {
                        self.report(format!(
                            "bin {}: second-stage strip of height {} below the minimum",
                            bin_pos, extent
                        ));
                    }
                }
            }

            // Maximum number of partial 2-cuts per first-stage strip.
            if let Some(maximum) = parameters.maximum_number_2_cuts {
                let mut strip_end = -1;
                let mut count = 0;
                for node in &bin.nodes {
                    let top = match o {
                        CutOrientation::Vertical => node.t,
                        CutOrientation::Horizontal => node.r,
                    };
                    if node.depth == 1 {
                        strip_end = top;
                        count = 0;
                    } else if node.depth == 2 && top != strip_end {
                        count += 1;
                        if count > maximum {
                            self.report(format!(
                                "bin {}: more than {} partial 2-cuts in one strip",
                                bin_pos, maximum
                            ));
                        }
                    }
                }
            }

            // Cut lines through defects.
            if !parameters.cut_through_defects {
                let thickness = parameters.cut_thickness;
                for node in &bin.nodes {
                    if node.depth < 1 {
                        continue;
                    }
                    let v = CutOrientation::Vertical;
                    let crossing = bin_type.defects.iter().any(|defect| {
                        let vertical_cut = |x: Length| {
                            defect.left(v) < x + thickness
                                && x < defect.right(v)
                                && defect.bottom(v) < node.t
                                && node.b < defect.top(v)
                        };
                        let horizontal_cut = |y: Length| {
                            defect.bottom(v) < y + thickness
                                && y < defect.top(v)
                                && defect.left(v) < node.r
                                && node.l < defect.right(v)
                        };
                        (node.l > 0 && vertical_cut(node.l - thickness))
                            || (node.r < bin_type.rect.w && vertical_cut(node.r))
                            || (node.b > 0 && horizontal_cut(node.b - thickness))
                            || (node.t < bin_type.rect.h && horizontal_cut(node.t))
                    });
                    if crossing {
                        self.report(format!(
                            "bin {}: cut of node ({}, {}, {}, {}) crosses a defect",
                            bin_pos, node.l, node.r, node.b, node.t
                        ));
                    }
                }
            }
        }

        // Copy bounds and stack precedence.
        for j in 0..instance.item_type_count() {
            if self.item_copies[j] > instance.item_type(j).copies {
                self.report(format!(
                    "item type {} packed {} times for {} copies",
                    j,
                    self.item_copies[j],
                    instance.item_type(j).copies
                ));
            }
        }
        for s in 0..instance.stack_count() {
            let mut previous_complete = true;
            for &j in instance.stack(s) {
                let item_type = instance.item_type(j);
                if self.item_copies[j] > 0 && !previous_complete {
                    self.report(format!("stack {} consumed out of order", s));
                }
                previous_complete = self.item_copies[j] == item_type.copies;
            }
        }
    }

    /// Writes the certificate CSV
    /// (`PLATE_ID,COPIES,NODE_ID,X,Y,WIDTH,HEIGHT,TYPE,CUT,PARENT`).
    pub fn write<P: AsRef<Path>>(&self, instance: &Instance, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let mut out = String::new();
        out.push_str("PLATE_ID,COPIES,NODE_ID,X,Y,WIDTH,HEIGHT,TYPE,CUT,PARENT\n");
        let mut offset = 0usize;
        for (bin_pos, bin) in self.bins.iter().enumerate() {
            for (node_id, node) in bin.nodes.iter().enumerate() {
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{},{},{}\n",
                    bin_pos,
                    bin.copies,
                    offset + node_id,
                    node.l,
                    node.b,
                    node.width(),
                    node.height(),
                    node.content.code(),
                    node.depth,
                    node.parent
                        .map(|f| (offset + f).to_string())
                        .unwrap_or_default(),
                ));
            }
            offset += bin.nodes.len();
            for defect in &instance.bin_type(bin.bin_type_id).defects {
                out.push_str(&format!(
                    "{},{},-1,{},{},{},{},-4,-1,\n",
                    bin_pos, bin.copies, defect.x, defect.y, defect.rect.w, defect.rect.h,
                ));
            }
        }
        let mut file = fs::File::create(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        file.write_all(out.as_bytes()).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Reads a certificate CSV back into a solution.
    pub fn read<P: AsRef<Path>>(instance: &Instance, path: P) -> Result<Solution, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        let invalid = |value: &str| Error::InvalidValue {
            path: path.display().to_string(),
            what: "certificate row",
            value: value.to_string(),
        };

        struct Row {
            plate: usize,
            copies: i64,
            node_id: i64,
            x: Length,
            y: Length,
            w: Length,
            h: Length,
            code: i64,
            cut: i32,
            parent: Option<i64>,
        }
        let mut rows = Vec::new();
        for line in content.lines().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 9 {
                return Err(invalid(line));
            }
            let parse = |index: usize| -> Result<i64, Error> {
                fields[index].trim().parse().map_err(|_| invalid(line))
            };
            rows.push(Row {
                plate: parse(0)? as usize,
                copies: parse(1)?,
                node_id: parse(2)?,
                x: parse(3)?,
                y: parse(4)?,
                w: parse(5)?,
                h: parse(6)?,
                code: parse(7)?,
                cut: parse(8)? as i32,
                parent: fields
                    .get(9)
                    .map(|f| f.trim())
                    .filter(|f| !f.is_empty())
                    .map(|f| f.parse().map_err(|_| invalid(line)))
                    .transpose()?,
            });
        }

        let bin_count = rows.iter().map(|row| row.plate + 1).max().unwrap_or(0);
        let mut bins = Vec::new();
        let mut offset = 0i64;
        for plate in 0..bin_count {
            let plate_rows: Vec<&Row> = rows
                .iter()
                .filter(|row| row.plate == plate && row.code != -4 && row.node_id >= 0)
                .collect();
            let root = plate_rows
                .iter()
                .find(|row| row.parent.is_none())
                .ok_or_else(|| invalid("missing bin root"))?;
            let bin_type_id = instance
                .bin_types()
                .iter()
                .find(|bin_type| bin_type.rect.w == root.w && bin_type.rect.h == root.h)
                .map(|bin_type| bin_type.id)
                .ok_or_else(|| invalid("unknown bin dimensions"))?;
            // The first stage is vertical when the depth-1 children stack
            // left to right.
            let first_cut_orientation = plate_rows
                .iter()
                .find(|row| row.cut == 1)
                .map(|row| {
                    if row.h == root.h {
                        CutOrientation::Vertical
                    } else {
                        CutOrientation::Horizontal
                    }
                })
                .unwrap_or(CutOrientation::Vertical);
            let nodes = plate_rows
                .iter()
                .map(|row| {
                    Ok(SolutionNode {
                        parent: row.parent.map(|f| (f - offset) as usize),
                        depth: row.cut,
                        l: row.x,
                        r: row.x + row.w,
                        b: row.y,
                        t: row.y + row.h,
                        content: NodeContent::from_code(row.code)
                            .ok_or_else(|| invalid("unknown node type"))?,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            offset += plate_rows.len() as i64;
            bins.push(SolutionBin {
                bin_type_id,
                copies: plate_rows.first().map(|row| row.copies).unwrap_or(1),
                first_cut_orientation,
                nodes,
            });
        }
        Ok(Solution::from_bins(instance, bins))
    }
}

fn touches_soft_edge(node: &SolutionNode, bin_type: &crate::instance::BinType) -> bool {
    use crate::instance::TrimType;
    (node.l == bin_type.left_trim.length
        && bin_type.left_trim.kind == TrimType::Soft
        && bin_type.left_trim.length > 0)
        || (node.r == bin_type.rect.w - bin_type.right_trim.length
            && bin_type.right_trim.kind == TrimType::Soft)
        || (node.b == bin_type.bottom_trim.length
            && bin_type.bottom_trim.kind == TrimType::Soft
            && bin_type.bottom_trim.length > 0)
        || (node.t == bin_type.rect.h - bin_type.top_trim.length
            && bin_type.top_trim.kind == TrimType::Soft)
}
