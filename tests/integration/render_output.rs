//! Renderer layout and count formatting.

use crossplan::plan::{
    Column, JoinStrategy, JoinType, Node, NodeKind, Plan, RowCount, ScanStrategy, Sorting,
    UnionType,
};
use crossplan::render::pretty_human_count;
use crossplan::tree::Tree;
use crossplan::RenderMode;

fn scan(table: &str, actual: f64) -> Node {
    let mut node = Node::new(NodeKind::Scan {
        table_name: table.to_string(),
        strategy: ScanStrategy::Scan,
    });
    node.rows_actual = actual;
    node.rows_estimated = actual;
    node
}

fn join_over(tables: [&str; 2]) -> Plan {
    let mut tree = Tree::new();
    let join = tree.push(Node::join(JoinType::Inner, JoinStrategy::Hash, "a = b").unwrap());
    let build = tree.push(scan(tables[0], 10.0));
    let probe = tree.push(scan(tables[1], 1000.0));
    tree.add_child(join, build);
    tree.add_child(join, probe);
    Plan::new(tree, join)
}

#[test]
fn counts_align_regardless_of_magnitude() {
    let widths: Vec<usize> = [
        pretty_human_count(RowCount::Exact(5)),
        pretty_human_count(RowCount::Exact(150_000_000)),
        pretty_human_count(RowCount::Unknown),
    ]
    .iter()
    .map(|s| s.chars().count())
    .collect();
    assert_eq!(widths, vec![8, 8, 8]);
}

#[test]
fn join_indents_only_the_build_side() {
    let plan = join_over(["dim", "fact"]);
    let output = plan.render(0, RenderMode::Muggle).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 3);

    assert!(lines[0].contains("INNER JOIN HASH ON a = b"));
    // Build side carries the connector, probe side sits at the join's own
    // indentation.
    assert!(lines[1].contains("│└SCAN dim"));
    assert!(lines[2].contains("SCAN fact"));
    assert!(!lines[2].contains("│"));
}

#[test]
fn union_siblings_carry_connectors() {
    let mut tree = Tree::new();
    let union = tree.push(Node::new(NodeKind::Union {
        union_type: UnionType::All,
    }));
    for table in ["a", "b", "c"] {
        let child = tree.push(scan(table, 1.0));
        tree.add_child(union, child);
    }
    let plan = Plan::new(tree, union);
    let output = plan.render(0, RenderMode::Muggle).unwrap();
    let lines: Vec<&str> = output.lines().collect();

    assert!(lines[0].contains("UNION ALL"));
    assert!(lines[1].contains("├─SCAN a"));
    assert!(lines[2].contains("├─SCAN b"));
    assert!(lines[3].contains("└─SCAN c"));
}

#[test]
fn symbolic_mode_uses_algebra_glyphs() {
    let mut tree = Tree::new();
    let sort = tree.push(Node::new(NodeKind::Sort {
        columns_sorted: vec![Column::with_sorting("revenue", Sorting::Desc).unwrap()],
    }));
    let selection = tree.push(Node::selection("l_tax > 0").unwrap());
    let base = tree.push(scan("lineitem", 100.0));
    tree.add_child(sort, selection);
    tree.add_child(selection, base);
    let plan = Plan::new(tree, sort);

    let output = plan.render(0, RenderMode::Symbolic).unwrap();
    assert!(output.contains("τ{revenue↓}"));
    assert!(output.contains("σ{l_tax > 0}"));
    assert!(output.contains("lineitem"));
}

#[test]
fn every_line_starts_with_two_fixed_width_counts() {
    let plan = join_over(["dim", "fact"]);
    let output = plan.render(0, RenderMode::Muggle).unwrap();
    for line in output.lines() {
        let prefix: Vec<char> = line.chars().take(17).collect();
        // Two 8-glyph counts separated by one space.
        assert_eq!(prefix[8], ' ');
        assert_eq!(prefix.len(), 17);
    }
}

#[test]
fn long_conditions_are_ellipsified_to_the_width() {
    let mut tree = Tree::new();
    let condition = "l_partkey = p_partkey AND l_quantity >= 1 AND l_quantity <= 11 AND p_size <= 5";
    let join = tree.push(Node::join(JoinType::Inner, JoinStrategy::Hash, condition).unwrap());
    let build = tree.push(scan("part", 10.0));
    let probe = tree.push(scan("lineitem", 1000.0));
    tree.add_child(join, build);
    tree.add_child(join, probe);
    let plan = Plan::new(tree, join);

    let output = plan.render(60, RenderMode::Muggle).unwrap();
    let first = output.lines().next().unwrap();
    assert!(first.chars().count() <= 60);
    assert!(first.ends_with("..."));
}

#[test]
fn nested_join_under_union_keeps_bars() {
    let mut tree = Tree::new();
    let union = tree.push(Node::new(NodeKind::Union {
        union_type: UnionType::All,
    }));
    let join = tree.push(Node::join(JoinType::Inner, JoinStrategy::Hash, "x = y").unwrap());
    let build = tree.push(scan("b", 1.0));
    let probe = tree.push(scan("p", 2.0));
    let lone = tree.push(scan("tail", 3.0));
    tree.add_child(union, join);
    tree.add_child(join, build);
    tree.add_child(join, probe);
    tree.add_child(union, lone);
    let plan = Plan::new(tree, union);

    let output = plan.render(0, RenderMode::Muggle).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert!(lines[1].contains("├─INNER JOIN"));
    assert!(lines[2].contains("│└SCAN b"));
    assert!(lines[4].contains("└─SCAN tail"));
}
