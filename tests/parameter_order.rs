mod common;

use common::{create_test_db, seed, User};
use proptest::prelude::*;
use rust_sqlite_query::{
    compile, describe, ColumnSet, CompareOp, Executor, Predicate, Query, Record, Value,
};

const COLUMNS: [&str; 4] = ["id", "name", "age", "is_active"];
const OPS: [CompareOp; 6] = [
    CompareOp::Eq,
    CompareOp::Ne,
    CompareOp::Gt,
    CompareOp::Gte,
    CompareOp::Lt,
    CompareOp::Lte,
];

/// Shape of a generated predicate tree.
#[derive(Debug, Clone)]
enum Node {
    Compare(usize, usize, i64),
    Like(usize, String),
    In(usize, Vec<i64>),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

fn node() -> impl Strategy<Value = Node> {
    let leaf = prop_oneof![
        (0..COLUMNS.len(), 0..OPS.len(), any::<i64>()).prop_map(|(c, o, v)| Node::Compare(c, o, v)),
        (0..COLUMNS.len(), "[a-z%_]{0,6}").prop_map(|(c, p)| Node::Like(c, p)),
        (0..COLUMNS.len(), prop::collection::vec(any::<i64>(), 0..4))
            .prop_map(|(c, vs)| Node::In(c, vs)),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Node::And),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Node::Or),
            inner.prop_map(|n| Node::Not(Box::new(n))),
        ]
    })
}

fn build(users: &ColumnSet, node: &Node) -> Predicate {
    let f = users.filter();
    match node {
        Node::Compare(c, o, v) => f.compare(COLUMNS[*c], OPS[*o], *v).unwrap(),
        Node::Like(c, p) => f.like(COLUMNS[*c], p.clone()).unwrap(),
        Node::In(c, vs) => f.is_in(COLUMNS[*c], vs.iter().copied()).unwrap(),
        Node::And(children) => Predicate::all(children.iter().map(|n| build(users, n))),
        Node::Or(children) => Predicate::any(children.iter().map(|n| build(users, n))),
        Node::Not(child) => build(users, child).not(),
    }
}

/// Literals in left-to-right, depth-first order.
fn traversal(node: &Node, out: &mut Vec<Value>) {
    match node {
        Node::Compare(_, _, v) => out.push(Value::from(*v)),
        Node::Like(_, p) => out.push(Value::from(p.as_str())),
        Node::In(_, vs) => out.extend(vs.iter().map(|v| Value::from(*v))),
        Node::And(children) | Node::Or(children) => {
            children.iter().for_each(|n| traversal(n, out));
        }
        Node::Not(child) => traversal(child, out),
    }
}

/// Placeholder numbers in the order they appear in the text.
fn placeholders(text: &str) -> Vec<usize> {
    let mut found = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '?' {
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some((j, d)) = chars.peek().copied() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }
        found.push(text[start..end].parse().unwrap());
    }
    found
}

proptest! {
    #[test]
    fn test_placeholders_follow_tree_traversal(tree in node()) {
        let users = describe(&User::definition()).unwrap();
        let query = Query::count(&users).filter(build(&users, &tree));
        let statement = compile(&query).unwrap();

        let mut expected = Vec::new();
        traversal(&tree, &mut expected);

        let numbers = placeholders(statement.text());
        prop_assert_eq!(numbers, (1..=expected.len()).collect::<Vec<_>>());
        prop_assert_eq!(statement.args(), expected.as_slice());
    }

    #[test]
    fn test_empty_in_never_matches(negate in any::<bool>(), column in 0..COLUMNS.len()) {
        let mut test = create_test_db().unwrap();
        seed(&mut test).unwrap();

        let none = test.users.filter().is_in(COLUMNS[column], Vec::<i64>::new()).unwrap();
        let (predicate, expected) = if negate { (none.not(), 5) } else { (none, 0) };
        let count: i64 = test
            .db
            .fetch_scalar(&Query::count(&test.users).filter(predicate))
            .unwrap();
        prop_assert_eq!(count, expected);
    }
}
