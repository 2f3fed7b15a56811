//! Formula parsing.
//!
//! A formula is infix arithmetic (`+ - * /`, parentheses) over variable
//! identifiers, where an identifier may carry a facet-filter suffix such as
//! `Count_Person_Female[ut=NumberUnit;mm=dcAggregate/Census;op=P1Y]`.
//! Variable identifiers contain characters (`/ [ ] = ; .`) that no standard
//! expression grammar accepts inside a name, so parsing is a round trip:
//! those characters are encoded to identifier-safe substitutes, the result
//! is handed to sqlparser's expression grammar, and every leaf is decoded
//! back when the tree is built.

use sqlparser::ast::{BinaryOperator, Expr as SqlExpr};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::errors::{Result, ServiceError};
use crate::model::Facet;

/// Substitution table for identifier characters the expression grammar
/// cannot accept. Decoding applies the table in reverse, so the round trip
/// is exact for any identifier built from these characters.
const ENCODE_PAIRS: &[(&str, &str)] = &[
	("/", "_SLASH_"),
	("[", "_LBRACKET_"),
	("]", "_RBRACKET_"),
	("=", "_EQUALS_"),
	(";", "_SEMICOLON_"),
	(".", "_DOT_"),
];

fn encode_for_parse(s: &str) -> String {
	let mut out = s.to_string();
	for (raw, encoded) in ENCODE_PAIRS {
		out = out.replace(raw, encoded);
	}
	out
}

fn decode_for_parse(s: &str) -> String {
	let mut out = s.to_string();
	for (raw, encoded) in ENCODE_PAIRS {
		out = out.replace(encoded, raw);
	}
	out
}

/// Facet constraint attached to a formula leaf. Only set fields constrain;
/// an unset field matches any facet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetFilter {
	pub measurement_method: Option<String>,
	pub observation_period: Option<String>,
	pub unit: Option<String>,
	pub scaling_factor: Option<String>,
}

impl FacetFilter {
	pub fn matches(&self, facet: &Facet) -> bool {
		if let Some(mm) = &self.measurement_method {
			if *mm != facet.measurement_method {
				return false;
			}
		}
		if let Some(op) = &self.observation_period {
			if *op != facet.observation_period {
				return false;
			}
		}
		if let Some(ut) = &self.unit {
			if *ut != facet.unit {
				return false;
			}
		}
		if let Some(sf) = &self.scaling_factor {
			if *sf != facet.scaling_factor {
				return false;
			}
		}
		true
	}
}

/// A formula leaf: one variable, optionally constrained to matching facets.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
	pub stat_var: String,
	pub facet: Option<FacetFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaOp {
	Add,
	Sub,
	Mul,
	Div,
}

/// Compiled expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaNode {
	Leaf(LeafNode),
	Binary {
		op: FormulaOp,
		left: Box<FormulaNode>,
		right: Box<FormulaNode>,
	},
}

/// A parsed formula together with its distinct leaf variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
	/// The formula text as registered in the cache.
	pub expression: String,
	pub root: FormulaNode,
	/// Distinct leaf variables, sorted; these are what a recursive
	/// observation query must fetch before the tree can be evaluated.
	pub stat_vars: Vec<String>,
}

/// Parse a formula string into its compiled form.
pub fn parse_formula(expression: &str) -> Result<Formula> {
	if expression.trim().is_empty() {
		return Err(ServiceError::InvalidArgument("empty formula".into()));
	}

	let encoded = encode_for_parse(expression);
	let dialect = GenericDialect {};
	let mut parser = Parser::new(&dialect).try_with_sql(&encoded).map_err(|e| {
		ServiceError::InvalidArgument(format!("malformed formula {:?}: {}", expression, e))
	})?;
	let expr = parser.parse_expr().map_err(|e| {
		ServiceError::InvalidArgument(format!("malformed formula {:?}: {}", expression, e))
	})?;
	if parser.peek_token().token != Token::EOF {
		return Err(ServiceError::InvalidArgument(format!(
			"trailing content in formula {:?}",
			expression
		)));
	}

	let root = build_node(&expr)?;
	let mut stat_vars = Vec::new();
	collect_stat_vars(&root, &mut stat_vars);
	stat_vars.sort();
	stat_vars.dedup();

	Ok(Formula {
		expression: expression.to_string(),
		root,
		stat_vars,
	})
}

fn build_node(expr: &SqlExpr) -> Result<FormulaNode> {
	match expr {
		SqlExpr::Identifier(ident) => parse_leaf(&decode_for_parse(&ident.value)),
		SqlExpr::Nested(inner) => build_node(inner),
		SqlExpr::BinaryOp { left, op, right } => {
			let op = match op {
				BinaryOperator::Plus => FormulaOp::Add,
				BinaryOperator::Minus => FormulaOp::Sub,
				BinaryOperator::Multiply => FormulaOp::Mul,
				BinaryOperator::Divide => FormulaOp::Div,
				other => {
					return Err(ServiceError::InvalidArgument(format!(
						"unsupported operator in formula: {}",
						other
					)))
				}
			};
			Ok(FormulaNode::Binary {
				op,
				left: Box::new(build_node(left)?),
				right: Box::new(build_node(right)?),
			})
		}
		other => Err(ServiceError::InvalidArgument(format!(
			"unsupported formula term: {}",
			other
		))),
	}
}

/// Parse a decoded leaf such as `Count_Person_Female[ut=NumberUnit;op=P1Y]`
/// into its variable and optional facet filter.
fn parse_leaf(leaf: &str) -> Result<FormulaNode> {
	let (stat_var, facet) = match leaf.find('[') {
		None => (leaf.to_string(), None),
		Some(start) => {
			if !leaf.ends_with(']') {
				return Err(ServiceError::InvalidArgument(format!(
					"unterminated facet filter in {:?}",
					leaf
				)));
			}
			let stat_var = leaf[..start].to_string();
			let filter = parse_facet_filter(&leaf[start + 1..leaf.len() - 1], leaf)?;
			(stat_var, Some(filter))
		}
	};
	if stat_var.is_empty() {
		return Err(ServiceError::InvalidArgument(format!(
			"missing variable in formula leaf {:?}",
			leaf
		)));
	}
	Ok(FormulaNode::Leaf(LeafNode { stat_var, facet }))
}

fn parse_facet_filter(body: &str, leaf: &str) -> Result<FacetFilter> {
	let mut filter = FacetFilter::default();
	for clause in body.split(';') {
		let (key, value) = clause.split_once('=').ok_or_else(|| {
			ServiceError::InvalidArgument(format!("bad facet clause {:?} in {:?}", clause, leaf))
		})?;
		let value = Some(value.to_string());
		match key {
			"mm" => filter.measurement_method = value,
			"op" => filter.observation_period = value,
			"ut" => filter.unit = value,
			"sf" => filter.scaling_factor = value,
			other => {
				return Err(ServiceError::InvalidArgument(format!(
					"unknown facet key {:?} in {:?}",
					other, leaf
				)))
			}
		}
	}
	Ok(filter)
}

fn collect_stat_vars(node: &FormulaNode, out: &mut Vec<String>) {
	match node {
		FormulaNode::Leaf(leaf) => out.push(leaf.stat_var.clone()),
		FormulaNode::Binary { left, right, .. } => {
			collect_stat_vars(left, out);
			collect_stat_vars(right, out);
		}
	}
}
