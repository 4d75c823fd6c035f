//! Problem instance: item and bin catalogs, defects, cut parameters, and the
//! read-only geometric queries the search engine runs on.

use crate::Error;

use std::fmt;
use std::fs;
use std::path::Path;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Integer length used for every geometric coordinate.
pub type Length = i64;

/// Integer area.
pub type Area = i64;

/// Profit or cost. Compared through [`strictly_greater`]/[`strictly_lesser`]
/// so accumulated rounding noise never flips an objective comparison.
pub type Profit = f64;

/// Item weight, used by the axle-sensitive guides and predecessor strategies.
pub type Weight = f64;

/// Id of an item type.
pub type ItemTypeId = usize;

/// Id of a bin type.
pub type BinTypeId = usize;

/// Id of a defect within its bin type.
pub type DefectId = usize;

/// Id of a stack (precedence chain) of items.
pub type StackId = usize;

const PROFIT_TOLERANCE: f64 = 1e-9;

/// Returns whether `a` is greater than `b` beyond the profit tolerance.
pub fn strictly_greater(a: f64, b: f64) -> bool {
    a > b + PROFIT_TOLERANCE * b.abs().max(1.0)
}

/// Returns whether `a` is lesser than `b` beyond the profit tolerance.
pub fn strictly_lesser(a: f64, b: f64) -> bool {
    strictly_greater(b, a)
}

/// Direction of a family of parallel cuts.
///
/// A vertical first stage cuts the bin into columns; a horizontal first
/// stage cuts it into rows. The whole engine works in coordinates aligned
/// with the first-stage orientation of the current bin, so `Horizontal`
/// swaps the roles of x and y in every accessor that takes an orientation.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum CutOrientation {
    /// First-stage cuts are vertical.
    Vertical,
    /// First-stage cuts are horizontal.
    Horizontal,
}

/// Requested orientation of the first stage.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Default)]
pub enum FirstStageOrientation {
    /// Only vertical first stages.
    Vertical,
    /// Only horizontal first stages.
    Horizontal,
    /// The solver may use either orientation.
    #[default]
    Any,
}

/// Restriction on how 2-cuts relate to their parent 1-cuts.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Default)]
pub enum CutType {
    /// ROADEF/EURO 2018 rules: a third-level subplate holds one item with
    /// waste above, one item above a defect with waste below, two stacked
    /// items of equal width, or a pure waste block over a defect.
    Roadef2018,
    /// Like `Roadef2018` without the defect-specific allowances limit.
    #[default]
    NonExact,
    /// Third-level subplates must be filled exactly by their item.
    Exact,
    /// `Exact`, and all items of one second-level strip share a type.
    Homogenous,
}

/// Number of alternating cut stages.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Default)]
pub enum Stages {
    /// Two-staged patterns.
    Two,
    /// Three-staged patterns.
    #[default]
    Three,
    /// No staging limit; solved with the staircase scheme.
    Free,
}

/// Whether a trim's bounding cut may coincide with a defect edge.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Default)]
pub enum TrimType {
    /// The trim cut behaves like the bin edge: minimum-waste distances are
    /// measured from the trim line and no cut may touch it.
    #[default]
    Hard,
    /// Minimum-waste distances are measured from the physical bin edge and
    /// a cut may sit exactly on a defect edge protruding into the trim.
    Soft,
}

/// A border strip of a bin where no item may be placed.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Trim {
    /// Width of the strip.
    pub length: Length,
    /// Hard or soft behavior of the bounding cut.
    pub kind: TrimType,
}

/// Optimization objective.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Default)]
pub enum Objective {
    /// Maximize profit, then minimize waste.
    #[default]
    Default,
    /// Pack all items in as few bins as possible.
    BinPacking,
    /// Pack all items minimizing waste, preferring a large final leftover.
    BinPackingWithLeftovers,
    /// Pack all items minimizing the used width.
    OpenDimensionX,
    /// Pack all items minimizing the used height.
    OpenDimensionY,
    /// Maximize packed profit.
    Knapsack,
    /// Pack all items minimizing total bin cost.
    VariableSizedBinPacking,
    /// Subproblem objective of the sequential one-dimensional scheme;
    /// compares packed profit.
    SequentialOneDimensionalSub,
}

impl Objective {
    /// Returns whether the objective requires all items to be packed.
    pub fn requires_full(self) -> bool {
        !matches!(
            self,
            Objective::Knapsack | Objective::Default | Objective::SequentialOneDimensionalSub
        )
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Objective::Default => "default",
            Objective::BinPacking => "bin-packing",
            Objective::BinPackingWithLeftovers => "bin-packing-with-leftovers",
            Objective::OpenDimensionX => "open-dimension-x",
            Objective::OpenDimensionY => "open-dimension-y",
            Objective::Knapsack => "knapsack",
            Objective::VariableSizedBinPacking => "variable-sized-bin-packing",
            Objective::SequentialOneDimensionalSub => "sequential-onedimensional-sub",
        };
        write!(f, "{}", name)
    }
}

/// Cut-generation parameters shared by every bin of an instance.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct Parameters {
    /// Number of cut stages.
    pub number_of_stages: Stages,
    /// Restriction on 2-cuts.
    pub cut_type: CutType,
    /// Orientation of the first stage.
    pub first_stage_orientation: FirstStageOrientation,
    /// Minimum width of a first-stage strip closed by waste.
    pub minimum_distance_1_cuts: Length,
    /// Maximum width of a first-stage strip, if bounded.
    pub maximum_distance_1_cuts: Option<Length>,
    /// Minimum height of a second-stage strip.
    pub minimum_distance_2_cuts: Length,
    /// Minimum side of any pure waste rectangle.
    pub minimum_waste_length: Length,
    /// Maximum number of partial 2-cuts per first-stage strip (validated on
    /// finished solutions only).
    pub maximum_number_2_cuts: Option<u32>,
    /// Material consumed by every cut.
    pub cut_thickness: Length,
    /// Whether a cut line may cross a defect interior.
    pub cut_through_defects: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            number_of_stages: Stages::Three,
            cut_type: CutType::NonExact,
            first_stage_orientation: FirstStageOrientation::Any,
            minimum_distance_1_cuts: 0,
            maximum_distance_1_cuts: None,
            minimum_distance_2_cuts: 0,
            minimum_waste_length: 0,
            maximum_number_2_cuts: None,
            cut_thickness: 0,
            cut_through_defects: false,
        }
    }
}

impl Parameters {
    /// ROADEF/EURO 2018 glass-cutting parameters.
    pub fn roadef2018() -> Self {
        Parameters {
            number_of_stages: Stages::Three,
            cut_type: CutType::Roadef2018,
            first_stage_orientation: FirstStageOrientation::Vertical,
            minimum_distance_1_cuts: 100,
            maximum_distance_1_cuts: Some(3500),
            minimum_distance_2_cuts: 100,
            minimum_waste_length: 20,
            maximum_number_2_cuts: None,
            cut_thickness: 0,
            cut_through_defects: false,
        }
    }
}

/// An axis-aligned rectangle given by its dimensions.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rectangle {
    /// Width.
    pub w: Length,
    /// Height.
    pub h: Length,
}

impl Rectangle {
    /// Area of the rectangle.
    pub fn area(&self) -> Area {
        self.w * self.h
    }

    /// Largest of the two dimensions.
    pub fn max(&self) -> Length {
        self.w.max(self.h)
    }
}

/// A forbidden rectangular region on the raw material of a bin.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Defect {
    /// Id of the defect within its bin type.
    pub id: DefectId,
    /// Bin type carrying the defect.
    pub bin_type_id: BinTypeId,
    /// X-coordinate of the bottom-left corner.
    pub x: Length,
    /// Y-coordinate of the bottom-left corner.
    pub y: Length,
    /// Dimensions of the defect.
    pub rect: Rectangle,
}

impl Defect {
    /// Left edge in the coordinate frame of orientation `o`.
    pub fn left(&self, o: CutOrientation) -> Length {
        match o {
            CutOrientation::Vertical => self.x,
            CutOrientation::Horizontal => self.y,
        }
    }

    /// Right edge in the coordinate frame of orientation `o`.
    pub fn right(&self, o: CutOrientation) -> Length {
        match o {
            CutOrientation::Vertical => self.x + self.rect.w,
            CutOrientation::Horizontal => self.y + self.rect.h,
        }
    }

    /// Bottom edge in the coordinate frame of orientation `o`.
    pub fn bottom(&self, o: CutOrientation) -> Length {
        match o {
            CutOrientation::Vertical => self.y,
            CutOrientation::Horizontal => self.x,
        }
    }

    /// Top edge in the coordinate frame of orientation `o`.
    pub fn top(&self, o: CutOrientation) -> Length {
        match o {
            CutOrientation::Vertical => self.y + self.rect.h,
            CutOrientation::Horizontal => self.x + self.rect.w,
        }
    }
}

/// A rectangular piece that needs to be cut, with its copy count and
/// placement restrictions.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug)]
pub struct ItemType {
    /// Id of the item type.
    pub id: ItemTypeId,
    /// Dimensions.
    pub rect: Rectangle,
    /// Profit gained by packing one copy.
    pub profit: Profit,
    /// Weight of one copy.
    pub weight: Weight,
    /// Number of copies to pack.
    pub copies: i64,
    /// Whether rotation by 90 degrees is forbidden.
    pub oriented: bool,
    /// Stack the item belongs to.
    pub stack_id: StackId,
    /// Position of the item inside its stack; items of one stack must be
    /// consumed in increasing position order.
    pub stack_pos: usize,
}

impl ItemType {
    /// Width of the item in the frame of orientation `o`, rotated or not.
    pub fn width(&self, rotate: bool, o: CutOrientation) -> Length {
        match (o, rotate) {
            (CutOrientation::Vertical, false) | (CutOrientation::Horizontal, true) => self.rect.w,
            _ => self.rect.h,
        }
    }

    /// Height of the item in the frame of orientation `o`, rotated or not.
    pub fn height(&self, rotate: bool, o: CutOrientation) -> Length {
        match (o, rotate) {
            (CutOrientation::Vertical, false) | (CutOrientation::Horizontal, true) => self.rect.h,
            _ => self.rect.w,
        }
    }
}

/// A stock sheet available to cut items from.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug)]
pub struct BinType {
    /// Id of the bin type.
    pub id: BinTypeId,
    /// Dimensions.
    pub rect: Rectangle,
    /// Cost of using one copy.
    pub cost: Profit,
    /// Number of available copies.
    pub copies: i64,
    /// Number of copies that must be used.
    pub copies_min: i64,
    /// Left border trim.
    pub left_trim: Trim,
    /// Right border trim.
    pub right_trim: Trim,
    /// Bottom border trim.
    pub bottom_trim: Trim,
    /// Top border trim.
    pub top_trim: Trim,
    /// Defects lying inside the trimmed area.
    pub defects: Vec<Defect>,
}

impl BinType {
    /// Width of the bin in the frame of orientation `o`.
    pub fn width(&self, o: CutOrientation) -> Length {
        match o {
            CutOrientation::Vertical => self.rect.w,
            CutOrientation::Horizontal => self.rect.h,
        }
    }

    /// Height of the bin in the frame of orientation `o`.
    pub fn height(&self, o: CutOrientation) -> Length {
        match o {
            CutOrientation::Vertical => self.rect.h,
            CutOrientation::Horizontal => self.rect.w,
        }
    }

    /// Trim on the left side of the frame of orientation `o`.
    pub fn left_trim_o(&self, o: CutOrientation) -> Trim {
        match o {
            CutOrientation::Vertical => self.left_trim,
            CutOrientation::Horizontal => self.bottom_trim,
        }
    }

    /// Trim on the right side of the frame of orientation `o`.
    pub fn right_trim_o(&self, o: CutOrientation) -> Trim {
        match o {
            CutOrientation::Vertical => self.right_trim,
            CutOrientation::Horizontal => self.top_trim,
        }
    }

    /// Trim on the bottom side of the frame of orientation `o`.
    pub fn bottom_trim_o(&self, o: CutOrientation) -> Trim {
        match o {
            CutOrientation::Vertical => self.bottom_trim,
            CutOrientation::Horizontal => self.left_trim,
        }
    }

    /// Trim on the top side of the frame of orientation `o`.
    pub fn top_trim_o(&self, o: CutOrientation) -> Trim {
        match o {
            CutOrientation::Vertical => self.top_trim,
            CutOrientation::Horizontal => self.right_trim,
        }
    }

    /// Area of the bin.
    pub fn area(&self) -> Area {
        self.rect.area()
    }
}

/// Read-only problem instance consumed by the branching schemes.
#[derive(Clone, Debug)]
pub struct Instance {
    objective: Objective,
    parameters: Parameters,
    item_types: Vec<ItemType>,
    bin_types: Vec<BinType>,
    /// For each stack, the item types it contains in consumption order.
    stacks: Vec<Vec<ItemTypeId>>,
    /// For each bin position, the bin type used at that position.
    bins_pos2type: Vec<BinTypeId>,
    /// Total area of the bins before each position.
    previous_bin_area: Vec<Area>,
    number_of_items: i64,
    item_area: Area,
    item_profit: Profit,
    defect_area: Area,
    packable_area: Area,
    max_efficiency_item_type: Option<ItemTypeId>,
    all_items_infinite: bool,
    /// `stack_pred[s]` points at an earlier stack holding the exact same
    /// item sequence; used to break stack symmetry during branching.
    stack_pred: Vec<Option<StackId>>,
    /// `predecessors[j]` lists item types that render `j` redundant at a
    /// position: at least as profitable and no larger on either side.
    predecessors: Vec<Vec<ItemTypeId>>,
    /// Same-footprint predecessors with lower weight (middle-axle strategy).
    predecessors_lighter: Vec<Vec<ItemTypeId>>,
    /// Same-footprint predecessors with higher weight (rear-axle strategy).
    predecessors_heavier: Vec<Vec<ItemTypeId>>,
}

impl Instance {
    /// Objective of the instance.
    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// Cut parameters of the instance.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Number of item types.
    pub fn item_type_count(&self) -> usize {
        self.item_types.len()
    }

    /// Total number of items (copies included).
    pub fn item_count(&self) -> i64 {
        self.number_of_items
    }

    /// Number of bin types.
    pub fn bin_type_count(&self) -> usize {
        self.bin_types.len()
    }

    /// Total number of bins (copies included).
    pub fn bin_count(&self) -> usize {
        self.bins_pos2type.len()
    }

    /// Number of stacks.
    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    /// Item type `id`.
    pub fn item_type(&self, id: ItemTypeId) -> &ItemType {
        &self.item_types[id]
    }

    /// All item types.
    pub fn item_types(&self) -> &[ItemType] {
        &self.item_types
    }

    /// Bin type `id`.
    pub fn bin_type(&self, id: BinTypeId) -> &BinType {
        &self.bin_types[id]
    }

    /// All bin types.
    pub fn bin_types(&self) -> &[BinType] {
        &self.bin_types
    }

    /// Defect `defect_id` of bin type `bin_type_id`.
    pub fn defect(&self, bin_type_id: BinTypeId, defect_id: DefectId) -> &Defect {
        &self.bin_types[bin_type_id].defects[defect_id]
    }

    /// Item types of stack `s` in consumption order.
    pub fn stack(&self, s: StackId) -> &[ItemTypeId] {
        &self.stacks[s]
    }

    /// Number of items in stack `s` (copies included).
    pub fn stack_size(&self, s: StackId) -> i64 {
        self.stacks[s]
            .iter()
            .map(|&j| self.item_types[j].copies)
            .sum()
    }

    /// Item type at consumption position `pos` of stack `s`.
    pub fn stack_item(&self, s: StackId, pos: i64) -> Option<ItemTypeId> {
        let mut consumed = 0;
        for &j in &self.stacks[s] {
            consumed += self.item_types[j].copies;
            if pos < consumed {
                return Some(j);
            }
        }
        None
    }

    /// Bin type used at bin position `pos`.
    pub fn bin_type_id_at(&self, pos: usize) -> BinTypeId {
        self.bins_pos2type[pos]
    }

    /// Total area of the bins placed before position `pos`.
    pub fn previous_bin_area(&self, pos: usize) -> Area {
        self.previous_bin_area[pos]
    }

    /// Total area of the items.
    pub fn item_area(&self) -> Area {
        self.item_area
    }

    /// Total profit of the items.
    pub fn item_profit(&self) -> Profit {
        self.item_profit
    }

    /// Total area of the defects.
    pub fn defect_area(&self) -> Area {
        self.defect_area
    }

    /// Total bin area minus defect area.
    pub fn packable_area(&self) -> Area {
        self.packable_area
    }

    /// Item type with the best profit per area, if any.
    pub fn max_efficiency_item_type(&self) -> Option<ItemTypeId> {
        self.max_efficiency_item_type
    }

    /// Returns whether every item type has practically unbounded copies.
    pub fn unbounded_knapsack(&self) -> bool {
        self.all_items_infinite
    }

    /// Earlier stack holding the same item sequence as `s`, if any.
    pub fn stack_pred(&self, s: StackId) -> Option<StackId> {
        self.stack_pred[s]
    }

    /// Item types dominating `j` under the given predecessor strategy.
    pub fn predecessors(&self, j: ItemTypeId, strategy: u8) -> &[ItemTypeId] {
        match strategy {
            1 => &self.predecessors_lighter[j],
            2 => &self.predecessors_heavier[j],
            _ => &self.predecessors[j],
        }
    }

    /// Returns the id of a defect of `bin_type_id` whose interior intersects
    /// the rectangle `(l, r, b, t)` in the frame of orientation `o`.
    pub fn rect_intersects_defect(
        &self,
        l: Length,
        r: Length,
        b: Length,
        t: Length,
        bin_type_id: BinTypeId,
        o: CutOrientation,
    ) -> Option<DefectId> {
        self.bin_types[bin_type_id]
            .defects
            .iter()
            .find(|k| k.left(o) < r && l < k.right(o) && k.bottom(o) < t && b < k.top(o))
            .map(|k| k.id)
    }

    /// Returns the id of a defect intersecting an item placed at `(l, b)`.
    pub fn item_intersects_defect(
        &self,
        l: Length,
        b: Length,
        item_type: &ItemType,
        rotate: bool,
        bin_type_id: BinTypeId,
        o: CutOrientation,
    ) -> Option<DefectId> {
        self.rect_intersects_defect(
            l,
            l + item_type.width(rotate, o),
            b,
            b + item_type.height(rotate, o),
            bin_type_id,
            o,
        )
    }

    /// Returns the id of a defect whose interior contains the vertical line
    /// at `x`.
    pub fn x_intersects_defect(
        &self,
        x: Length,
        bin_type_id: BinTypeId,
        o: CutOrientation,
    ) -> Option<DefectId> {
        self.bin_types[bin_type_id]
            .defects
            .iter()
            .find(|k| k.left(o) < x && x < k.right(o))
            .map(|k| k.id)
    }

    /// Returns the id of a defect whose interior contains the horizontal
    /// line at `y` restricted to `(l, r)`.
    pub fn y_intersects_defect(
        &self,
        l: Length,
        r: Length,
        y: Length,
        bin_type_id: BinTypeId,
        o: CutOrientation,
    ) -> Option<DefectId> {
        self.bin_types[bin_type_id]
            .defects
            .iter()
            .find(|k| k.bottom(o) < y && y < k.top(o) && k.left(o) < r && l < k.right(o))
            .map(|k| k.id)
    }
}

/// Incremental builder for [`Instance`], also hosting the CSV readers.
#[derive(Clone, Debug, Default)]
pub struct InstanceBuilder {
    objective: Objective,
    parameters: Parameters,
    item_types: Vec<ItemType>,
    bin_types: Vec<BinType>,
    next_stack: StackId,
}

impl InstanceBuilder {
    /// Creates an empty builder with default parameters.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the objective.
    pub fn set_objective(&mut self, objective: Objective) -> &mut Self {
        self.objective = objective;
        self
    }

    /// Replaces the whole parameter set.
    pub fn set_parameters(&mut self, parameters: Parameters) -> &mut Self {
        self.parameters = parameters;
        self
    }

    /// Applies the ROADEF/EURO 2018 parameter preset.
    pub fn set_roadef2018(&mut self) -> &mut Self {
        self.parameters = Parameters::roadef2018();
        self
    }

    /// Sets the number of stages.
    pub fn set_number_of_stages(&mut self, stages: Stages) -> &mut Self {
        self.parameters.number_of_stages = stages;
        self
    }

    /// Sets the cut type.
    pub fn set_cut_type(&mut self, cut_type: CutType) -> &mut Self {
        self.parameters.cut_type = cut_type;
        self
    }

    /// Sets the first-stage orientation.
    pub fn set_first_stage_orientation(&mut self, o: FirstStageOrientation) -> &mut Self {
        self.parameters.first_stage_orientation = o;
        self
    }

    /// Sets the minimum distance between 1-cuts.
    pub fn set_minimum_distance_1_cuts(&mut self, d: Length) -> &mut Self {
        self.parameters.minimum_distance_1_cuts = d;
        self
    }

    /// Sets the maximum distance between 1-cuts; `None` removes the bound.
    pub fn set_maximum_distance_1_cuts(&mut self, d: Option<Length>) -> &mut Self {
        self.parameters.maximum_distance_1_cuts = d;
        self
    }

    /// Sets the minimum distance between 2-cuts.
    pub fn set_minimum_distance_2_cuts(&mut self, d: Length) -> &mut Self {
        self.parameters.minimum_distance_2_cuts = d;
        self
    }

    /// Sets the minimum waste length.
    pub fn set_minimum_waste_length(&mut self, d: Length) -> &mut Self {
        self.parameters.minimum_waste_length = d;
        self
    }

    /// Sets the maximum number of partial 2-cuts per first-level strip.
    pub fn set_maximum_number_2_cuts(&mut self, n: Option<u32>) -> &mut Self {
        self.parameters.maximum_number_2_cuts = n;
        self
    }

    /// Sets the cut thickness.
    pub fn set_cut_thickness(&mut self, thickness: Length) -> &mut Self {
        self.parameters.cut_thickness = thickness;
        self
    }

    /// Sets whether cuts may cross defects.
    pub fn set_cut_through_defects(&mut self, allow: bool) -> &mut Self {
        self.parameters.cut_through_defects = allow;
        self
    }

    /// Applies a 4-character predefined parameter string `DCON`:
    /// stages, cut type (`R|N|E|H`), orientation (`V|H|A`), rotation
    /// (`R` rotatable, `O` oriented).
    pub fn set_predefined(&mut self, code: &str) -> Result<&mut Self, Error> {
        let invalid = || Error::InvalidPredefined(code.to_string());
        let chars: Vec<char> = code.chars().collect();
        if chars.len() != 4 {
            return Err(invalid());
        }
        self.parameters.number_of_stages = match chars[0] {
            '2' => Stages::Two,
            '3' => Stages::Three,
            _ => return Err(invalid()),
        };
        self.parameters.cut_type = match chars[1] {
            'R' | 'r' => CutType::Roadef2018,
            'N' | 'n' => CutType::NonExact,
            'E' | 'e' => CutType::Exact,
            'H' | 'h' => CutType::Homogenous,
            _ => return Err(invalid()),
        };
        self.parameters.first_stage_orientation = match chars[2] {
            'V' | 'v' => FirstStageOrientation::Vertical,
            'H' | 'h' => FirstStageOrientation::Horizontal,
            'A' | 'a' => FirstStageOrientation::Any,
            _ => return Err(invalid()),
        };
        match chars[3] {
            'R' | 'r' => {}
            'O' | 'o' => {
                for item_type in self.item_types.iter_mut() {
                    item_type.oriented = true;
                }
            }
            _ => return Err(invalid()),
        }
        Ok(self)
    }

    /// Adds an item type and returns its id. A `None` profit defaults to the
    /// item area; a `None` stack opens a fresh stack.
    pub fn add_item_type(
        &mut self,
        w: Length,
        h: Length,
        profit: Option<Profit>,
        copies: i64,
        oriented: bool,
        stack_id: Option<StackId>,
    ) -> ItemTypeId {
        let id = self.item_types.len();
        let stack_id = match stack_id {
            Some(s) => {
                self.next_stack = self.next_stack.max(s + 1);
                s
            }
            None => {
                let s = self.next_stack;
                self.next_stack += 1;
                s
            }
        };
        let stack_pos = self
            .item_types
            .iter()
            .filter(|item_type| item_type.stack_id == stack_id)
            .count();
        self.item_types.push(ItemType {
            id,
            rect: Rectangle { w, h },
            profit: profit.unwrap_or((w * h) as Profit),
            weight: 0.0,
            copies,
            oriented,
            stack_id,
            stack_pos,
        });
        id
    }

    /// Sets the weight of an item type.
    pub fn set_item_weight(&mut self, item_type_id: ItemTypeId, weight: Weight) -> &mut Self {
        self.item_types[item_type_id].weight = weight;
        self
    }

    /// Adds a bin type and returns its id. A `None` cost defaults to the
    /// bin area.
    pub fn add_bin_type(
        &mut self,
        w: Length,
        h: Length,
        cost: Option<Profit>,
        copies: i64,
        copies_min: i64,
    ) -> BinTypeId {
        let id = self.bin_types.len();
        self.bin_types.push(BinType {
            id,
            rect: Rectangle { w, h },
            cost: cost.unwrap_or((w * h) as Profit),
            copies,
            copies_min,
            left_trim: Trim::default(),
            right_trim: Trim::default(),
            bottom_trim: Trim::default(),
            top_trim: Trim::default(),
            defects: Vec::new(),
        });
        id
    }

    /// Sets the four border trims of a bin type.
    pub fn add_trims(
        &mut self,
        bin_type_id: BinTypeId,
        left: Trim,
        right: Trim,
        bottom: Trim,
        top: Trim,
    ) -> Result<&mut Self, Error> {
        let bin_type = &mut self.bin_types[bin_type_id];
        let invalid = |message: String| Error::InvalidInput {
            what: "trims",
            message,
        };
        if left.length < 0 || right.length < 0 || bottom.length < 0 || top.length < 0 {
            return Err(invalid("trim lengths must be non-negative".to_string()));
        }
        if left.length + right.length >= bin_type.rect.w {
            return Err(invalid(format!(
                "left trim {} + right trim {} must be smaller than the bin width {}",
                left.length, right.length, bin_type.rect.w
            )));
        }
        if bottom.length + top.length >= bin_type.rect.h {
            return Err(invalid(format!(
                "bottom trim {} + top trim {} must be smaller than the bin height {}",
                bottom.length, top.length, bin_type.rect.h
            )));
        }
        bin_type.left_trim = left;
        bin_type.right_trim = right;
        bin_type.bottom_trim = bottom;
        bin_type.top_trim = top;
        Ok(self)
    }

    /// Adds a defect to a bin type and returns its id.
    pub fn add_defect(
        &mut self,
        bin_type_id: BinTypeId,
        x: Length,
        y: Length,
        w: Length,
        h: Length,
    ) -> DefectId {
        let bin_type = &mut self.bin_types[bin_type_id];
        let id = bin_type.defects.len();
        bin_type.defects.push(Defect {
            id,
            bin_type_id,
            x,
            y,
            rect: Rectangle { w, h },
        });
        id
    }

    /// Gives every bin type an effectively unbounded number of copies.
    pub fn set_bin_infinite_copies(&mut self) -> &mut Self {
        let total_items: i64 = self.item_types.iter().map(|j| j.copies).sum();
        for bin_type in self.bin_types.iter_mut() {
            bin_type.copies = total_items.max(1);
            bin_type.copies_min = 0;
        }
        self
    }

    /// Gives every bin type an effectively unbounded width (strip packing).
    pub fn set_bin_infinite_width(&mut self) -> &mut Self {
        let length_sum: Length = self
            .item_types
            .iter()
            .map(|j| j.copies * j.rect.max())
            .sum();
        for bin_type in self.bin_types.iter_mut() {
            bin_type.rect.w = length_sum.max(bin_type.rect.w);
        }
        self
    }

    /// Gives every bin type an effectively unbounded height (strip packing).
    pub fn set_bin_infinite_height(&mut self) -> &mut Self {
        let length_sum: Length = self
            .item_types
            .iter()
            .map(|j| j.copies * j.rect.max())
            .sum();
        for bin_type in self.bin_types.iter_mut() {
            bin_type.rect.h = length_sum.max(bin_type.rect.h);
        }
        self
    }

    /// Sets every bin cost to the bin area.
    pub fn set_bin_unweighted(&mut self) -> &mut Self {
        for bin_type in self.bin_types.iter_mut() {
            bin_type.cost = bin_type.rect.area() as Profit;
        }
        self
    }

    /// Gives every item type enough copies to fill all bins.
    pub fn set_item_infinite_copies(&mut self) -> &mut Self {
        let bin_area: Area = self
            .bin_types
            .iter()
            .map(|bin_type| bin_type.copies * bin_type.rect.area())
            .sum();
        for item_type in self.item_types.iter_mut() {
            let area = item_type.rect.area().max(1);
            item_type.copies = (bin_area / area + 1).max(item_type.copies);
        }
        self
    }

    /// Sets every item profit to the item area.
    pub fn set_unweighted(&mut self) -> &mut Self {
        for item_type in self.item_types.iter_mut() {
            item_type.profit = item_type.rect.area() as Profit;
        }
        self
    }

    /// Forbids rotation for every item type.
    pub fn set_no_item_rotation(&mut self) -> &mut Self {
        for item_type in self.item_types.iter_mut() {
            item_type.oriented = true;
        }
        self
    }

    /// Reads an items CSV file
    /// (`ID,WIDTH,HEIGHT,PROFIT,COPIES,ORIENTED,STACK_ID`).
    pub fn read_item_types<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Self, Error> {
        let path = path.as_ref();
        let rows = read_csv(path)?;
        for row in rows {
            let w = row.length(path, "WIDTH")?;
            let h = row.length(path, "HEIGHT")?;
            // A negative profit is the conventional "default to area" marker.
            let profit = row.opt_f64(path, "PROFIT")?.filter(|&p| p >= 0.0);
            let copies = row.opt_i64(path, "COPIES")?.unwrap_or(1);
            let oriented = row.opt_i64(path, "ORIENTED")?.unwrap_or(0) != 0;
            let stack_id = match row.opt_i64(path, "STACK_ID")? {
                Some(s) if s >= 0 => Some(s as StackId),
                _ => None,
            };
            let id = self.add_item_type(w, h, profit, copies, oriented, stack_id);
            if let Some(weight) = row.opt_f64(path, "WEIGHT")? {
                self.set_item_weight(id, weight);
            }
        }
        Ok(self)
    }

    /// Reads a bins CSV file (`ID,WIDTH,HEIGHT,COST,COPIES,COPIES_MIN,`
    /// trim lengths and trim types).
    pub fn read_bin_types<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Self, Error> {
        let path = path.as_ref();
        let rows = read_csv(path)?;
        for row in rows {
            let w = row.length(path, "WIDTH")?;
            let h = row.length(path, "HEIGHT")?;
            let cost = row.opt_f64(path, "COST")?.filter(|&c| c >= 0.0);
            let copies = row.opt_i64(path, "COPIES")?.unwrap_or(1);
            let copies_min = row.opt_i64(path, "COPIES_MIN")?.unwrap_or(0);
            if copies_min > copies {
                return Err(Error::InvalidInput {
                    what: "bin copies",
                    message: format!(
                        "COPIES_MIN {} exceeds COPIES {} in \"{}\"",
                        copies_min,
                        copies,
                        path.display()
                    ),
                });
            }
            let id = self.add_bin_type(w, h, cost, copies, copies_min);
            let trim = |length_col: &'static str,
                        type_col: &'static str|
             -> Result<Trim, Error> {
                let length = row.opt_i64(path, length_col)?.unwrap_or(0);
                let kind = match row.get(type_col) {
                    Some(value) => parse_trim_type(value).ok_or_else(|| Error::InvalidValue {
                        path: path.display().to_string(),
                        what: type_col,
                        value: value.to_string(),
                    })?,
                    None => TrimType::default(),
                };
                Ok(Trim { length, kind })
            };
            let left = trim("LEFT_TRIM", "LEFT_TRIM_TYPE")?;
            let right = trim("RIGHT_TRIM", "RIGHT_TRIM_TYPE")?;
            let bottom = trim("BOTTOM_TRIM", "BOTTOM_TRIM_TYPE")?;
            let top = trim("TOP_TRIM", "TOP_TRIM_TYPE")?;
            self.add_trims(id, left, right, bottom, top)?;
        }
        Ok(self)
    }

    /// Reads a defects CSV file (`ID,BIN,X,Y,WIDTH,HEIGHT`).
    pub fn read_defects<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Self, Error> {
        let path = path.as_ref();
        let rows = read_csv(path)?;
        for row in rows {
            let bin = row.length(path, "BIN")? as usize;
            let x = row.length(path, "X")?;
            let y = row.length(path, "Y")?;
            let w = row.length(path, "WIDTH")?;
            let h = row.length(path, "HEIGHT")?;
            if bin >= self.bin_types.len() {
                return Err(Error::InvalidInput {
                    what: "defect",
                    message: format!("unknown bin type {} in \"{}\"", bin, path.display()),
                });
            }
            self.add_defect(bin, x, y, w, h);
        }
        Ok(self)
    }

    /// Reads a two-column `NAME,VALUE` parameters CSV file.
    pub fn read_parameters<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Self, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        for line in content.lines().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(2, ',');
            let name = fields.next().unwrap_or("").trim();
            let value = fields.next().unwrap_or("").trim();
            self.set_parameter(name, value)
                .map_err(|_| Error::InvalidValue {
                    path: path.display().to_string(),
                    what: "parameter",
                    value: format!("{},{}", name, value),
                })?;
        }
        Ok(self)
    }

    /// Sets one parameter from its CSV/CLI name and string value.
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<&mut Self, ()> {
        match name {
            "objective" => self.objective = parse_objective(value).ok_or(())?,
            "number_of_stages" => {
                self.parameters.number_of_stages = match value {
                    "2" => Stages::Two,
                    "3" => Stages::Three,
                    "inf" | "infinite" => Stages::Free,
                    _ => return Err(()),
                }
            }
            "cut_type" => self.parameters.cut_type = parse_cut_type(value).ok_or(())?,
            "first_stage_orientation" => {
                self.parameters.first_stage_orientation =
                    parse_first_stage_orientation(value).ok_or(())?
            }
            "minimum_distance_1_cuts" => {
                self.parameters.minimum_distance_1_cuts = value.parse().map_err(|_| ())?
            }
            "maximum_distance_1_cuts" => {
                let d: Length = value.parse().map_err(|_| ())?;
                self.parameters.maximum_distance_1_cuts = (d >= 0).then_some(d);
            }
            "minimum_distance_2_cuts" => {
                self.parameters.minimum_distance_2_cuts = value.parse().map_err(|_| ())?
            }
            "minimum_waste_length" => {
                self.parameters.minimum_waste_length = value.parse().map_err(|_| ())?
            }
            "maximum_number_2_cuts" => {
                let n: i64 = value.parse().map_err(|_| ())?;
                self.parameters.maximum_number_2_cuts = (n >= 0).then_some(n as u32);
            }
            "cut_thickness" => self.parameters.cut_thickness = value.parse().map_err(|_| ())?,
            "cut_through_defects" => {
                self.parameters.cut_through_defects = match value {
                    "1" | "true" => true,
                    "0" | "false" => false,
                    _ => return Err(()),
                }
            }
            _ => return Err(()),
        }
        Ok(self)
    }

    /// Finalizes the instance, computing every derived table.
    pub fn build(self) -> Instance {
        let InstanceBuilder {
            objective,
            parameters,
            item_types,
            bin_types,
            ..
        } = self;

        let stack_count = item_types
            .iter()
            .map(|item_type| item_type.stack_id + 1)
            .max()
            .unwrap_or(0);
        let mut stacks: Vec<Vec<ItemTypeId>> = vec![Vec::new(); stack_count];
        for item_type in &item_types {
            stacks[item_type.stack_id].push(item_type.id);
        }
        for stack in stacks.iter_mut() {
            stack.sort_by_key(|&j| item_types[j].stack_pos);
        }

        let mut bins_pos2type = Vec::new();
        let mut previous_bin_area = Vec::new();
        let mut area_acc = 0;
        for bin_type in &bin_types {
            for _ in 0..bin_type.copies {
                bins_pos2type.push(bin_type.id);
                previous_bin_area.push(area_acc);
                area_acc += bin_type.rect.area();
            }
        }

        let number_of_items = item_types.iter().map(|j| j.copies).sum();
        let item_area = item_types.iter().map(|j| j.copies * j.rect.area()).sum();
        let item_profit = item_types
            .iter()
            .map(|j| j.copies as Profit * j.profit)
            .sum();
        let defect_area: Area = bin_types
            .iter()
            .map(|bin_type| {
                bin_type.copies
                    * bin_type
                        .defects
                        .iter()
                        .map(|k| k.rect.area())
                        .sum::<Area>()
            })
            .sum();
        let packable_area = area_acc - defect_area;
        let max_efficiency_item_type = item_types
            .iter()
            .max_by(|a, b| {
                let ea = a.profit / a.rect.area() as f64;
                let eb = b.profit / b.rect.area() as f64;
                ea.total_cmp(&eb)
            })
            .map(|item_type| item_type.id);
        // A type counts as unbounded once its copies alone cover the bins.
        let all_items_infinite = !item_types.is_empty()
            && item_types
                .iter()
                .all(|j| j.copies * j.rect.area() >= area_acc);

        let mut stack_pred: Vec<Option<StackId>> = vec![None; stack_count];
        for s2 in 1..stack_count {
            for s1 in (0..s2).rev() {
                let equal = stacks[s1].len() == stacks[s2].len()
                    && stacks[s1].iter().zip(&stacks[s2]).all(|(&a, &b)| {
                        let (a, b) = (&item_types[a], &item_types[b]);
                        a.rect == b.rect
                            && a.profit == b.profit
                            && a.copies == b.copies
                            && a.oriented == b.oriented
                    });
                if equal {
                    stack_pred[s2] = Some(s1);
                    break;
                }
            }
        }

        let dominates = |a: &ItemType, b: &ItemType| {
            // `a` predecesses `b`: at least as profitable, no larger. Exact
            // ties fall to the lower id so two identical types never block
            // each other.
            a.id != b.id
                && a.oriented == b.oriented
                && !strictly_lesser(a.profit, b.profit)
                && a.rect.w <= b.rect.w
                && a.rect.h <= b.rect.h
                && (strictly_greater(a.profit, b.profit)
                    || a.rect.w < b.rect.w
                    || a.rect.h < b.rect.h
                    || a.id < b.id)
        };
        let same_footprint = |a: &ItemType, b: &ItemType| {
            a.id != b.id
                && a.rect == b.rect
                && a.oriented == b.oriented
                && a.profit == b.profit
        };
        let mut predecessors = vec![Vec::new(); item_types.len()];
        let mut predecessors_lighter = vec![Vec::new(); item_types.len()];
        let mut predecessors_heavier = vec![Vec::new(); item_types.len()];
        for b in &item_types {
            for a in &item_types {
                if dominates(a, b) {
                    predecessors[b.id].push(a.id);
                }
                if same_footprint(a, b)
                    && (a.weight < b.weight || (a.weight == b.weight && a.id < b.id))
                {
                    predecessors_lighter[b.id].push(a.id);
                }
                if same_footprint(a, b)
                    && (a.weight > b.weight || (a.weight == b.weight && a.id < b.id))
                {
                    predecessors_heavier[b.id].push(a.id);
                }
            }
        }

        Instance {
            objective,
            parameters,
            item_types,
            bin_types,
            stacks,
            bins_pos2type,
            previous_bin_area,
            number_of_items,
            item_area,
            item_profit,
            defect_area,
            packable_area,
            max_efficiency_item_type,
            all_items_infinite,
            stack_pred,
            predecessors,
            predecessors_lighter,
            predecessors_heavier,
        }
    }
}

fn parse_trim_type(value: &str) -> Option<TrimType> {
    match value.trim() {
        "H" | "h" | "hard" | "0" | "" => Some(TrimType::Hard),
        "S" | "s" | "soft" | "1" => Some(TrimType::Soft),
        _ => None,
    }
}

/// Parses an objective from its CSV/CLI spelling.
pub fn parse_objective(value: &str) -> Option<Objective> {
    match value.to_ascii_lowercase().as_str() {
        "default" => Some(Objective::Default),
        "bin-packing" | "binpacking" => Some(Objective::BinPacking),
        "bin-packing-with-leftovers" | "binpackingwithleftovers" => {
            Some(Objective::BinPackingWithLeftovers)
        }
        "open-dimension-x" | "opendimensionx" => Some(Objective::OpenDimensionX),
        "open-dimension-y" | "opendimensiony" => Some(Objective::OpenDimensionY),
        "knapsack" => Some(Objective::Knapsack),
        "variable-sized-bin-packing" | "variablesizedbinpacking" => {
            Some(Objective::VariableSizedBinPacking)
        }
        "sequential-onedimensional-sub" => Some(Objective::SequentialOneDimensionalSub),
        _ => None,
    }
}

/// Parses a cut type from its CSV/CLI spelling.
pub fn parse_cut_type(value: &str) -> Option<CutType> {
    match value.to_ascii_lowercase().as_str() {
        "roadef2018" => Some(CutType::Roadef2018),
        "non-exact" | "nonexact" => Some(CutType::NonExact),
        "exact" => Some(CutType::Exact),
        "homogenous" | "homogeneous" => Some(CutType::Homogenous),
        _ => None,
    }
}

/// Parses a first-stage orientation from its CSV/CLI spelling.
pub fn parse_first_stage_orientation(value: &str) -> Option<FirstStageOrientation> {
    match value.to_ascii_lowercase().as_str() {
        "vertical" => Some(FirstStageOrientation::Vertical),
        "horizontal" => Some(FirstStageOrientation::Horizontal),
        "any" => Some(FirstStageOrientation::Any),
        _ => None,
    }
}

/// One parsed CSV row with access to its cells by column name.
struct CsvRow {
    header: std::rc::Rc<Vec<String>>,
    fields: Vec<String>,
}

impl CsvRow {
    fn get(&self, column: &str) -> Option<&str> {
        let pos = self.header.iter().position(|name| name == column)?;
        let value = self.fields.get(pos)?.trim();
        (!value.is_empty()).then_some(value)
    }

    fn length(&self, path: &Path, column: &'static str) -> Result<Length, Error> {
        let value = self.get(column).ok_or_else(|| Error::MissingColumn {
            path: path.display().to_string(),
            column,
        })?;
        value.parse().map_err(|_| Error::InvalidValue {
            path: path.display().to_string(),
            what: column,
            value: value.to_string(),
        })
    }

    fn opt_i64(&self, path: &Path, column: &'static str) -> Result<Option<i64>, Error> {
        match self.get(column) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| Error::InvalidValue {
                    path: path.display().to_string(),
                    what: column,
                    value: value.to_string(),
                }),
        }
    }

    fn opt_f64(&self, path: &Path, column: &'static str) -> Result<Option<f64>, Error> {
        match self.get(column) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| Error::InvalidValue {
                    path: path.display().to_string(),
                    what: column,
                    value: value.to_string(),
                }),
        }
    }
}

/// Reads a headered comma-separated file. The input formats use no quoting,
/// so a plain split is sufficient.
fn read_csv(path: &Path) -> Result<Vec<CsvRow>, Error> {
    let content = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut lines = content.lines();
    let header = std::rc::Rc::new(
        lines
            .next()
            .unwrap_or("")
            .split(',')
            .map(|name| name.trim().to_string())
            .collect::<Vec<_>>(),
    );
    let mut rows = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        rows.push(CsvRow {
            header: header.clone(),
            fields: line.split(',').map(|field| field.to_string()).collect(),
        });
    }
    Ok(rows)
}
