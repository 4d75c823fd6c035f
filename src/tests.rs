use super::*;

use crate::search::{iterative_beam_search, BeamSearchParameters, BranchingScheme, Stop};
use crate::staged::{Insertion, StagedParameters, StagedScheme};
use crate::staircase::{StaircaseParameters, StaircaseScheme};

use rand::prelude::*;

use std::time::Duration;

fn ins(
    i1: i64,
    i2: i64,
    df: i8,
    x1: Length,
    y2: Length,
    x3: Length,
    x1_max: Length,
    y2_max: Length,
    z1: u8,
    z2: u8,
) -> Insertion {
    Insertion {
        item_type_id_1: (i1 >= 0).then_some(i1 as usize),
        item_type_id_2: (i2 >= 0).then_some(i2 as usize),
        df,
        x1,
        y2,
        x3,
        x1_max,
        y2_max,
        z1,
        z2,
    }
}

/// Builder preset shared by the kernel tests: vertical first stage and the
/// waste-minimization objective.
fn vertical_builder() -> InstanceBuilder {
    let mut builder = InstanceBuilder::new();
    builder
        .set_objective(Objective::BinPackingWithLeftovers)
        .set_first_stage_orientation(FirstStageOrientation::Vertical);
    builder
}

fn staged(instance: &Instance) -> StagedScheme<'_> {
    StagedScheme::new(instance, StagedParameters::default())
}

#[test]
fn cut_thickness_basic() {
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20);
    builder.add_item_type(500, 500, None, 1, false, Some(0));
    builder.add_item_type(1000, 1000, None, 1, false, Some(0));
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 500, 500, 500, 6000, 3210, 1, 1);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(
        scheme.insertions(&node),
        vec![
            ins(1, -1, 2, 1520, 1000, 1520, 6000, 3210, 1, 1),
            ins(1, -1, 1, 1000, 1520, 1000, 6000, 3210, 1, 1),
        ]
    );
}

#[test]
fn cut_thickness_partial_cut() {
    // With no minimum waste, the last 1-cut may stop short of the edge.
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20);
    builder.add_item_type(3000, 500, None, 1, false, Some(0));
    builder.add_item_type(2970, 3210, None, 1, false, Some(0));
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 3000, 500, 3000, 6000, 3210, 1, 1);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(
        scheme.insertions(&node),
        vec![ins(1, -1, 0, 5990, 3210, 5990, 6000, 3210, 1, 1)]
    );
}

#[test]
fn cut_thickness_partial_cut_forbidden_by_minimum_waste() {
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20).set_minimum_waste_length(10);
    builder.add_item_type(3000, 500, None, 1, false, Some(0));
    builder.add_item_type(2970, 3210, None, 1, false, Some(0));
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 3000, 500, 3000, 6000, 3210, 0, 0);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(scheme.insertions(&node), vec![]);
}

#[test]
fn cut_thickness_partial_2_cut() {
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20);
    builder.add_item_type(3000, 1000, None, 1, false, Some(0));
    builder.add_item_type(6000, 2180, None, 1, false, Some(0));
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 3000, 1000, 3000, 6000, 3210, 1, 1);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(
        scheme.insertions(&node),
        vec![ins(1, -1, 1, 6000, 3200, 6000, 6000, 3210, 1, 1)]
    );
}

#[test]
fn cut_thickness_partial_2_cut_forbidden_by_minimum_waste() {
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20).set_minimum_waste_length(10);
    builder.add_item_type(3000, 1000, None, 1, false, Some(0));
    builder.add_item_type(6000, 2180, None, 1, false, Some(0));
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 3000, 1000, 3000, 6000, 3210, 0, 0);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(scheme.insertions(&node), vec![]);
}

#[test]
fn cut_thickness_x1_max_capped_by_defect() {
    // The frozen 2-cut of the new subplate may not stretch across the
    // defect at (4000, 1000), so the 1-cut is capped just left of it.
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20).set_cut_through_defects(false);
    builder.add_item_type(3000, 1000, None, 1, false, Some(0));
    builder.add_item_type(3500, 2190, None, 1, false, Some(0));
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_defect(bin, 4000, 1000, 20, 20);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 3000, 1000, 3000, 6000, 3210, 1, 1);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(
        scheme.insertions(&node),
        vec![
            ins(-1, -1, 2, 4020, 1020, 4020, 6000, 3210, 1, 1),
            ins(1, -1, 1, 3500, 3210, 3500, 3980, 3210, 1, 1),
        ]
    );
}

#[test]
fn cut_thickness_y2_max_capped_by_defect() {
    // The 3-cut band at x = 3000 sits exactly under the defect, so the
    // 2-cut of this strip may never grow past the defect bottom.
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20).set_cut_through_defects(false);
    builder.add_item_type(3000, 1500, None, 1, true, Some(0));
    builder.add_item_type(1000, 2000, None, 1, true, Some(0));
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_defect(bin, 3000, 2500, 20, 20);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 3020, 1500, 3000, 6000, 2480, 1, 1);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(
        scheme.insertions(&node),
        vec![
            ins(1, -1, 2, 4020, 2000, 4020, 6000, 2480, 1, 1),
            ins(-1, -1, 1, 3020, 2520, 3020, 6000, 3210, 1, 1),
        ]
    );
}

#[test]
fn cut_thickness_3_cut_through_defect_rejected() {
    // The item's right cut would cross the defect; only the waste block
    // pushing past the defect remains.
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20).set_cut_through_defects(false);
    builder.add_item_type(3000, 1000, None, 1, true, Some(0));
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_defect(bin, 3005, 500, 10, 10);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    assert_eq!(
        scheme.insertions(&root),
        vec![ins(-1, -1, -1, 3015, 510, 3015, 6000, 3210, 1, 1)]
    );
}

#[test]
fn cut_thickness_shift_includes_minimum_waste() {
    // Moving the 1-cut for the wider second item must leave thickness plus
    // a full minimum-waste strip on both sides.
    let mut builder = vertical_builder();
    builder.set_cut_thickness(20).set_minimum_waste_length(30);
    builder.add_item_type(3000, 1000, None, 1, true, Some(0));
    builder.add_item_type(3010, 2190, None, 1, true, Some(0));
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 3000, 1000, 3000, 6000, 3210, 0, 0);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(
        scheme.insertions(&node),
        vec![ins(1, -1, 1, 3060, 3210, 3010, 6000, 3210, 1, 0)]
    );
}

fn roadef_builder() -> InstanceBuilder {
    let mut builder = InstanceBuilder::new();
    builder
        .set_objective(Objective::BinPackingWithLeftovers)
        .set_roadef2018();
    builder
}

fn soft(length: Length) -> Trim {
    Trim {
        length,
        kind: TrimType::Soft,
    }
}

fn hard(length: Length) -> Trim {
    Trim {
        length,
        kind: TrimType::Hard,
    }
}

#[test]
fn bottom_trim_soft_allows_defect_adjacent_cut() {
    let mut builder = roadef_builder();
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_trims(bin, soft(0), soft(0), soft(20), soft(0)).unwrap();
    builder.add_defect(bin, 495, 25, 5, 5);
    builder.add_item_type(1000, 500, None, 1, true, Some(0));
    let instance = builder.build();

    let scheme = staged(&instance);
    assert_eq!(
        scheme.insertions(&scheme.root()),
        vec![
            ins(-1, 0, -1, 1000, 530, 1000, 3500, 3210, 0, 1),
            ins(-1, -1, -1, 500, 30, 500, 3500, 3210, 1, 1),
        ]
    );
}

#[test]
fn bottom_trim_hard_forbids_defect_adjacent_cut() {
    let mut builder = roadef_builder();
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_trims(bin, soft(0), soft(0), hard(20), soft(0)).unwrap();
    builder.add_defect(bin, 495, 25, 5, 5);
    builder.add_item_type(1000, 500, None, 1, true, Some(0));
    let instance = builder.build();

    let scheme = staged(&instance);
    assert_eq!(
        scheme.insertions(&scheme.root()),
        vec![
            ins(-1, 0, -1, 1000, 540, 1000, 3500, 3210, 0, 1),
            ins(-1, -1, -1, 500, 40, 500, 3500, 3210, 1, 1),
        ]
    );
}

#[test]
fn left_trim_soft_and_hard() {
    for (kind, x3) in [(TrimType::Soft, 30), (TrimType::Hard, 40)] {
        let mut builder = roadef_builder();
        let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
        builder
            .add_trims(bin, Trim { length: 20, kind }, soft(0), soft(0), soft(0))
            .unwrap();
        builder.add_defect(bin, 25, 495, 5, 5);
        builder.add_item_type(500, 1000, None, 1, true, Some(0));
        let instance = builder.build();

        let scheme = staged(&instance);
        assert_eq!(
            scheme.insertions(&scheme.root()),
            vec![
                ins(-1, 0, -1, 520, 1500, 520, 3520, 3210, 0, 1),
                ins(-1, -1, -1, x3, 500, x3, 3520, 3210, 1, 1),
            ]
        );
    }
}

#[test]
fn top_trim_soft_allows_short_leftover() {
    let mut builder = roadef_builder();
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_trims(bin, soft(0), soft(0), soft(0), soft(20)).unwrap();
    builder.add_item_type(1000, 3180, None, 1, true, Some(0));
    let instance = builder.build();

    let scheme = staged(&instance);
    assert_eq!(
        scheme.insertions(&scheme.root()),
        vec![ins(0, -1, -1, 1000, 3180, 1000, 3500, 3190, 0, 0)]
    );
}

#[test]
fn top_trim_hard_rejects_short_leftover() {
    let mut builder = roadef_builder();
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_trims(bin, soft(0), soft(0), soft(0), hard(20)).unwrap();
    builder.add_item_type(1000, 3180, None, 1, true, Some(0));
    let instance = builder.build();

    let scheme = staged(&instance);
    assert_eq!(scheme.insertions(&scheme.root()), vec![]);
}

#[test]
fn right_trim_soft_and_hard() {
    for (kind, expected) in [
        (
            TrimType::Soft,
            vec![ins(0, -1, -1, 2970, 500, 2970, 2980, 3210, 0, 0)],
        ),
        (TrimType::Hard, vec![]),
    ] {
        let mut builder = roadef_builder();
        let bin = builder.add_bin_type(3000, 3210, None, 1, 0);
        builder
            .add_trims(bin, soft(0), Trim { length: 20, kind }, soft(0), soft(0))
            .unwrap();
        builder.add_item_type(2970, 500, None, 1, true, Some(0));
        let instance = builder.build();

        let scheme = staged(&instance);
        assert_eq!(scheme.insertions(&scheme.root()), expected);
    }
}

#[test]
fn trims_with_defect_under_exact_cuts() {
    let mut builder = InstanceBuilder::new();
    builder.set_objective(Objective::BinPackingWithLeftovers);
    builder.set_predefined("3EVR").unwrap();
    builder
        .set_cut_through_defects(true)
        .set_minimum_waste_length(10)
        .set_minimum_distance_1_cuts(10)
        .set_maximum_distance_1_cuts(Some(3210))
        .set_cut_thickness(3);
    let bin = builder.add_bin_type(3210, 2250, None, 1, 0);
    builder.add_trims(bin, soft(10), hard(10), soft(10), soft(10)).unwrap();
    builder.add_defect(bin, 12, 9, 300, 54);
    builder.add_item_type(910, 846, None, 1, false, Some(0));
    let instance = builder.build();

    let scheme = staged(&instance);
    assert_eq!(
        scheme.insertions(&scheme.root()),
        vec![ins(-1, -1, -1, 312, 63, 312, 3200, 2240, 1, 1)]
    );
}

#[test]
fn two_cut_slides_above_defect() {
    let mut builder = roadef_builder();
    builder.add_item_type(500, 1000, None, 1, false, Some(0));
    builder.add_item_type(1000, 1000, None, 1, false, Some(0));
    builder.add_item_type(200, 3180, None, 1, false, Some(0));
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_defect(bin, 500, 995, 10, 10);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 1000, 500, 1000, 3500, 3210, 0, 0);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(
        scheme.insertions(&node),
        vec![
            ins(1, -1, 2, 2000, 1020, 2000, 3500, 3210, 0, 1),
            ins(-1, 1, 1, 1000, 2005, 1000, 3500, 3210, 0, 1),
            ins(-1, -1, 1, 1000, 1005, 510, 3500, 3210, 0, 1),
        ]
    );
}

#[test]
fn two_cut_crosses_defect_when_allowed() {
    let mut builder = roadef_builder();
    builder.set_cut_through_defects(true);
    builder.add_item_type(500, 1000, None, 1, false, Some(0));
    builder.add_item_type(1000, 1000, None, 1, false, Some(0));
    builder.add_item_type(200, 3180, None, 1, false, Some(0));
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_defect(bin, 500, 995, 10, 10);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let i0 = ins(0, -1, -1, 1000, 500, 1000, 3500, 3210, 0, 0);
    assert!(scheme.insertions(&root).contains(&i0));
    let node = scheme.child(&root, &i0);

    assert_eq!(
        scheme.insertions(&node),
        vec![
            ins(1, -1, 2, 2000, 1000, 2000, 3500, 3210, 0, 0),
            ins(-1, 1, 1, 1000, 2005, 1000, 3500, 3210, 0, 1),
            ins(-1, -1, 1, 1000, 1005, 510, 3500, 3210, 0, 1),
        ]
    );
}

#[test]
fn item_floats_above_bottom_defect() {
    let mut builder = roadef_builder();
    builder.add_item_type(500, 1000, None, 1, false, Some(0));
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_defect(bin, 990, 0, 20, 20);
    let instance = builder.build();

    // The rotated orientation would need a 3-cut through the defect and is
    // rejected; the upright one fits left of the defect.
    let scheme = staged(&instance);
    assert_eq!(
        scheme.insertions(&scheme.root()),
        vec![
            ins(0, -1, -1, 500, 1000, 500, 3500, 3210, 0, 0),
            ins(-1, -1, -1, 1010, 20, 1010, 3500, 3210, 1, 1),
        ]
    );

    let mut builder = roadef_builder();
    builder.set_cut_through_defects(true);
    builder.add_item_type(500, 1000, None, 1, false, Some(0));
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_defect(bin, 990, 0, 20, 20);
    let instance = builder.build();

    let scheme = staged(&instance);
    assert_eq!(
        scheme.insertions(&scheme.root()),
        vec![
            ins(-1, 0, -1, 1000, 520, 1000, 3500, 3210, 0, 1),
            ins(0, -1, -1, 500, 1000, 500, 3500, 3210, 0, 0),
            ins(-1, -1, -1, 1010, 20, 1010, 3500, 3210, 1, 1),
        ]
    );
}

#[test]
fn two_items_fill_one_subplate() {
    let mut builder = InstanceBuilder::new();
    builder
        .set_objective(Objective::BinPackingWithLeftovers)
        .set_cut_type(CutType::Roadef2018)
        .set_first_stage_orientation(FirstStageOrientation::Vertical);
    builder.add_item_type(1000, 500, None, 1, true, None);
    builder.add_item_type(1000, 700, None, 1, true, None);
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let insertions = scheme.insertions(&scheme.root());
    assert!(insertions.contains(&ins(0, 1, -1, 1000, 1200, 1000, 6000, 3210, 1, 2)));
}

#[test]
fn knapsack_with_defect_packs_everything() {
    let mut builder = InstanceBuilder::new();
    builder
        .set_objective(Objective::Knapsack)
        .set_number_of_stages(Stages::Three)
        .set_cut_type(CutType::Exact)
        .set_first_stage_orientation(FirstStageOrientation::Vertical)
        .set_cut_through_defects(false);
    builder.add_item_type(500, 500, None, 1, false, None);
    builder.add_item_type(500, 500, None, 1, false, None);
    builder.add_item_type(2000, 2000, None, 1, false, None);
    let bin = builder.add_bin_type(6000, 3210, None, 1, 0);
    builder.add_defect(bin, 995, 900, 10, 10);
    let instance = builder.build();

    let mut optimizer = Optimizer::new(&instance);
    optimizer.set_sequential().set_maximum_queue_size(512);
    let output = optimizer.solve(|_| {});

    assert_eq!(output.solution.number_of_items(), 3);
    assert!(output.solution.feasible());
    assert!(output.solution.waste() <= 6000 * 3210 - (2 * 250_000 + 4_000_000));
}

#[test]
fn variable_sized_bin_packing_prefers_cheap_bins() {
    let mut builder = InstanceBuilder::new();
    builder
        .set_objective(Objective::VariableSizedBinPacking)
        .set_first_stage_orientation(FirstStageOrientation::Vertical);
    builder.add_bin_type(10000, 10000, Some(10.0), 1, 0);
    builder.add_bin_type(4000, 4000, Some(1.0), 2, 0);
    builder.add_item_type(3000, 3000, None, 2, false, None);
    let instance = builder.build();

    let mut optimizer = Optimizer::new(&instance);
    optimizer.set_sequential().set_maximum_queue_size(64);
    let output = optimizer.solve(|_| {});

    assert_eq!(output.solution.number_of_items(), 2);
    assert_eq!(output.solution.number_of_bins(), 2);
    assert_eq!(output.solution.cost(), 2.0);
}

#[test]
fn certificate_round_trip() {
    let mut builder = vertical_builder();
    builder.set_objective(Objective::Knapsack);
    builder.add_item_type(1000, 800, None, 2, false, None);
    builder.add_item_type(2500, 1500, None, 1, false, None);
    let bin = builder.add_bin_type(6000, 3210, None, 2, 0);
    builder.add_defect(bin, 3000, 3000, 50, 50);
    let instance = builder.build();

    let mut optimizer = Optimizer::new(&instance);
    optimizer.set_sequential().set_maximum_queue_size(64);
    let output = optimizer.solve(|_| {});
    assert!(output.solution.number_of_items() > 0);

    let dir = std::env::temp_dir().join("cut-solver-2d-round-trip");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("solution.csv");
    output.solution.write(&instance, &path).unwrap();
    let read_back = Solution::read(&instance, &path).unwrap();

    assert_eq!(read_back.bins(), output.solution.bins());
    assert_eq!(read_back.waste(), output.solution.waste());
    assert_eq!(read_back.number_of_items(), output.solution.number_of_items());
}

#[test]
fn to_solution_is_idempotent() {
    let mut builder = vertical_builder();
    builder.add_item_type(1000, 800, None, 1, false, Some(0));
    builder.add_item_type(1200, 600, None, 1, false, Some(0));
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let mut node = scheme.root();
    loop {
        let insertions = scheme.insertions(&node);
        match insertions.first() {
            Some(insertion) => node = scheme.child(&node, insertion),
            None => break,
        }
    }
    let first = StagedScheme::to_solution(&scheme, &node);
    let second = StagedScheme::to_solution(&scheme, &node);
    assert_eq!(first.bins(), second.bins());
    assert_eq!(first.waste(), second.waste());
}

#[test]
fn dominance_is_a_preorder() {
    let mut builder = vertical_builder();
    builder.add_item_type(700, 600, None, 3, false, None);
    builder.add_item_type(900, 400, None, 2, false, None);
    builder.add_bin_type(4000, 3000, None, 2, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let root = scheme.root();
    let mut nodes = vec![];
    for child in BranchingScheme::children(&scheme, &root) {
        for grandchild in BranchingScheme::children(&scheme, &child) {
            nodes.push(grandchild);
        }
        nodes.push(child);
    }

    for node in &nodes {
        assert!(scheme.dominates(node, node));
    }
    for a in &nodes {
        for b in &nodes {
            for c in &nodes {
                if scheme.bucket_key(a) == scheme.bucket_key(b)
                    && scheme.bucket_key(b) == scheme.bucket_key(c)
                    && scheme.dominates(a, b)
                    && scheme.dominates(b, c)
                {
                    assert!(scheme.dominates(a, c));
                }
            }
        }
    }
}

#[test]
fn beam_search_is_deterministic() {
    let mut builder = vertical_builder();
    builder.set_objective(Objective::Knapsack);
    builder.add_item_type(1000, 800, None, 2, false, None);
    builder.add_item_type(700, 1200, None, 2, false, None);
    builder.add_item_type(2500, 1500, None, 1, false, None);
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let run = || {
        let scheme = StagedScheme::new(&instance, StagedParameters::default());
        let parameters = BeamSearchParameters {
            maximum_queue_size: 32,
            ..Default::default()
        };
        let output = iterative_beam_search(&scheme, &parameters, &Stop::new(None), |_, _| {});
        output
            .best
            .map(|node| StagedScheme::to_solution(&scheme, &node))
    };
    let first = run().expect("a solution exists");
    let second = run().expect("a solution exists");
    assert_eq!(first.bins(), second.bins());
    assert_eq!(first.profit(), second.profit());
}

#[test]
fn staircase_packs_all_items() {
    let mut builder = InstanceBuilder::new();
    builder
        .set_objective(Objective::Knapsack)
        .set_number_of_stages(Stages::Free);
    builder.add_item_type(1000, 800, None, 2, false, None);
    builder.add_item_type(700, 1200, None, 2, false, None);
    builder.add_bin_type(4000, 3000, None, 1, 0);
    let instance = builder.build();

    let scheme = StaircaseScheme::new(&instance, StaircaseParameters::default());
    let parameters = BeamSearchParameters {
        maximum_queue_size: 64,
        ..Default::default()
    };
    let output = iterative_beam_search(&scheme, &parameters, &Stop::new(None), |_, _| {});
    let best = output.best.expect("a placement exists");
    assert_eq!(best.number_of_items, 4);
    let solution = StaircaseScheme::to_solution(&scheme, &best);
    assert!(solution.feasible());
    assert_eq!(solution.number_of_items(), 4);
}

#[test]
fn staircase_avoids_defects() {
    let mut builder = InstanceBuilder::new();
    builder
        .set_objective(Objective::Knapsack)
        .set_number_of_stages(Stages::Free);
    builder.add_item_type(1000, 800, None, 1, true, None);
    let bin = builder.add_bin_type(4000, 3000, None, 1, 0);
    builder.add_defect(bin, 0, 0, 200, 200);
    let instance = builder.build();

    let scheme = StaircaseScheme::new(&instance, StaircaseParameters::default());
    let children = StaircaseScheme::children(&scheme, &scheme.root());
    assert!(!children.is_empty());
    // The bottom anchor slides right of the defect.
    assert!(children.iter().all(|n| n.x >= 200 || n.y >= 200));
}

#[test]
fn reading_input_files() {
    let dir = std::env::temp_dir().join("cut-solver-2d-io");
    std::fs::create_dir_all(&dir).unwrap();
    let items = dir.join("items.csv");
    let bins = dir.join("bins.csv");
    let defects = dir.join("defects.csv");
    let parameters = dir.join("parameters.csv");
    std::fs::write(
        &items,
        "ID,WIDTH,HEIGHT,PROFIT,COPIES,ORIENTED,STACK_ID\n0,1000,800,-1,2,0,-1\n1,700,1200,900000,1,1,4\n",
    )
    .unwrap();
    std::fs::write(
        &bins,
        "ID,WIDTH,HEIGHT,COST,COPIES,BOTTOM_TRIM,BOTTOM_TRIM_TYPE\n0,6000,3210,-1,2,20,S\n",
    )
    .unwrap();
    std::fs::write(&defects, "ID,BIN,X,Y,WIDTH,HEIGHT\n0,0,100,200,10,10\n").unwrap();
    std::fs::write(
        &parameters,
        "NAME,VALUE\nobjective,knapsack\nnumber_of_stages,3\ncut_type,roadef2018\nminimum_waste_length,20\ncut_through_defects,0\n",
    )
    .unwrap();

    let mut builder = InstanceBuilder::new();
    builder.read_parameters(&parameters).unwrap();
    builder.read_bin_types(&bins).unwrap();
    builder.read_defects(&defects).unwrap();
    builder.read_item_types(&items).unwrap();
    let instance = builder.build();

    assert_eq!(instance.objective(), Objective::Knapsack);
    assert_eq!(instance.parameters().minimum_waste_length, 20);
    assert_eq!(instance.parameters().cut_type, CutType::Roadef2018);
    assert_eq!(instance.item_type_count(), 2);
    assert_eq!(instance.item_count(), 3);
    assert_eq!(instance.item_type(0).profit, 800_000.0);
    assert_eq!(instance.item_type(1).profit, 900_000.0);
    assert!(instance.item_type(1).oriented);
    assert_eq!(instance.bin_count(), 2);
    assert_eq!(
        instance.bin_type(0).bottom_trim,
        Trim {
            length: 20,
            kind: TrimType::Soft
        }
    );
    assert_eq!(instance.bin_type(0).defects.len(), 1);
}

#[test]
fn reading_rejects_bad_input() {
    let dir = std::env::temp_dir().join("cut-solver-2d-bad-io");
    std::fs::create_dir_all(&dir).unwrap();

    let missing = dir.join("missing-column.csv");
    std::fs::write(&missing, "ID,WIDTH\n0,1000\n").unwrap();
    let error = InstanceBuilder::new().read_item_types(&missing).unwrap_err();
    assert!(matches!(
        error,
        Error::MissingColumn {
            column: "HEIGHT",
            ..
        }
    ));

    let contradictory = dir.join("contradictory.csv");
    std::fs::write(
        &contradictory,
        "ID,WIDTH,HEIGHT,COPIES,COPIES_MIN\n0,100,100,1,2\n",
    )
    .unwrap();
    let error = InstanceBuilder::new()
        .read_bin_types(&contradictory)
        .unwrap_err();
    assert!(matches!(error, Error::InvalidInput { .. }));

    let error = InstanceBuilder::new()
        .read_item_types(dir.join("absent.csv"))
        .unwrap_err();
    assert!(matches!(error, Error::Io { .. }));
}

#[test]
fn predefined_parameter_codes() {
    let mut builder = InstanceBuilder::new();
    builder.add_item_type(100, 200, None, 1, false, None);
    builder.set_predefined("3RVR").unwrap();
    let instance = builder.clone().build();
    assert_eq!(instance.parameters().number_of_stages, Stages::Three);
    assert_eq!(instance.parameters().cut_type, CutType::Roadef2018);
    assert_eq!(
        instance.parameters().first_stage_orientation,
        FirstStageOrientation::Vertical
    );
    assert!(!instance.item_type(0).oriented);

    builder.set_predefined("2NHO").unwrap();
    let instance = builder.clone().build();
    assert_eq!(instance.parameters().number_of_stages, Stages::Two);
    assert_eq!(instance.parameters().cut_type, CutType::NonExact);
    assert_eq!(
        instance.parameters().first_stage_orientation,
        FirstStageOrientation::Horizontal
    );
    assert!(instance.item_type(0).oriented);

    assert!(builder.set_predefined("5XYZ").is_err());
    assert!(builder.set_predefined("3R").is_err());
}

#[test]
fn improvements_are_monotone() {
    let mut builder = vertical_builder();
    builder.set_objective(Objective::Knapsack);
    builder.add_item_type(900, 700, None, 4, false, None);
    builder.add_item_type(1100, 900, None, 3, false, None);
    builder.add_bin_type(3000, 2500, None, 1, 0);
    let instance = builder.build();

    let profits = std::sync::Mutex::new(Vec::new());
    let mut optimizer = Optimizer::new(&instance);
    optimizer
        .set_sequential()
        .set_maximum_queue_size(128)
        .set_time_limit(Some(Duration::from_secs(10)));
    let output = optimizer.solve(|solution| {
        profits.lock().unwrap().push(solution.profit());
    });

    let profits = profits.into_inner().unwrap();
    assert!(!profits.is_empty());
    for window in profits.windows(2) {
        assert!(window[1] > window[0]);
    }
    assert_eq!(output.solution.profit(), *profits.last().unwrap());
}

#[test]
#[should_panic(expected = "invalid solution")]
fn validator_rejects_overlapping_items() {
    let mut builder = vertical_builder();
    builder.add_item_type(1000, 1000, None, 2, false, None);
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let bin = SolutionBin {
        bin_type_id: 0,
        copies: 1,
        first_cut_orientation: CutOrientation::Vertical,
        nodes: vec![
            SolutionNode {
                parent: None,
                depth: 0,
                l: 0,
                r: 6000,
                b: 0,
                t: 3210,
                content: NodeContent::Branch,
            },
            SolutionNode {
                parent: Some(0),
                depth: 1,
                l: 0,
                r: 1000,
                b: 0,
                t: 1000,
                content: NodeContent::Item(0),
            },
            SolutionNode {
                parent: Some(0),
                depth: 1,
                l: 500,
                r: 1500,
                b: 500,
                t: 1500,
                content: NodeContent::Item(0),
            },
        ],
    };
    let _ = Solution::from_bins(&instance, vec![bin]);
}

/// Randomized searches never produce a solution the validator rejects:
/// `Solution::from_bins` asserts every placement and cut rule in debug
/// builds, so reaching the assertions below means the invariants held.
#[test]
fn random_instances_produce_valid_solutions() {
    let mut rng = StdRng::seed_from_u64(7);
    for round in 0..12 {
        let mut builder = InstanceBuilder::new();
        let objective = if round % 2 == 0 {
            Objective::Knapsack
        } else {
            Objective::BinPackingWithLeftovers
        };
        builder
            .set_objective(objective)
            .set_first_stage_orientation(FirstStageOrientation::Vertical)
            .set_minimum_waste_length(*[0, 10].choose(&mut rng).unwrap())
            .set_cut_thickness(*[0, 7].choose(&mut rng).unwrap());
        let bin = builder.add_bin_type(
            rng.gen_range(2000..4000),
            rng.gen_range(2000..4000),
            None,
            3,
            0,
        );
        if rng.gen_bool(0.5) {
            builder.add_defect(
                bin,
                rng.gen_range(100..1500),
                rng.gen_range(100..1500),
                rng.gen_range(10..80),
                rng.gen_range(10..80),
            );
        }
        for _ in 0..rng.gen_range(2..5) {
            builder.add_item_type(
                rng.gen_range(50..1200),
                rng.gen_range(50..1200),
                None,
                rng.gen_range(1..3),
                rng.gen_bool(0.3),
                None,
            );
        }
        let instance = builder.build();

        let mut optimizer = Optimizer::new(&instance);
        optimizer.set_sequential().set_maximum_queue_size(16);
        let output = optimizer.solve(|_| {});

        assert!(output.solution.feasible());
        for j in 0..instance.item_type_count() {
            assert!(output.solution.item_copies(j) <= instance.item_type(j).copies);
        }
    }
}

#[test]
fn bound_is_monotone() {
    // Once `bound` fires against an incumbent, no descendant may beat it.
    let mut builder = vertical_builder();
    builder.set_objective(Objective::Knapsack);
    builder.add_item_type(1200, 900, None, 2, false, None);
    builder.add_item_type(800, 700, None, 1, false, None);
    builder.add_bin_type(2500, 2000, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let parameters = BeamSearchParameters {
        maximum_queue_size: 256,
        ..Default::default()
    };
    let output = iterative_beam_search(&scheme, &parameters, &Stop::new(None), |_, _| {});
    let best = output.best.expect("a solution exists");

    let mut stack = vec![scheme.root()];
    while let Some(node) = stack.pop() {
        let children = BranchingScheme::children(&scheme, &node);
        if scheme.bound(&node, &best) {
            // Exhaust the subtree and check no descendant improves.
            let mut subtree = children;
            while let Some(descendant) = subtree.pop() {
                assert!(!scheme.better(&descendant, &best));
                subtree.extend(BranchingScheme::children(&scheme, &descendant));
            }
        } else {
            stack.extend(children);
        }
    }
}

#[test]
fn stack_precedence_is_respected() {
    let mut builder = vertical_builder();
    builder.set_objective(Objective::Knapsack);
    // Two items in one stack: the second may only be placed after the first.
    builder.add_item_type(1500, 1000, None, 1, false, Some(0));
    builder.add_item_type(800, 800, None, 1, false, Some(0));
    builder.add_bin_type(6000, 3210, None, 1, 0);
    let instance = builder.build();

    let scheme = staged(&instance);
    let insertions = scheme.insertions(&scheme.root());
    assert!(insertions
        .iter()
        .all(|insertion| insertion.item_type_id_1 != Some(1)
            && insertion.item_type_id_2 != Some(1)));

    let mut optimizer = Optimizer::new(&instance);
    optimizer.set_sequential().set_maximum_queue_size(32);
    let output = optimizer.solve(|_| {});
    assert_eq!(output.solution.number_of_items(), 2);
}
