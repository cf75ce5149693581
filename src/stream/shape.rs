//! Subscription shapes and their expansion into primitive requests.
//!
//! A shape names one or more subtypes plus parameters; every side may be a
//! single value or a list, and the shape stands for the cartesian product:
//!
//! - `(subtype(s),)` e.g. `("allMarketTickers",)`
//! - `(subtype(s), param(s))` e.g. `(["trade", "ticker"], ["BTCUSDT", "ETHUSDT"])`
//! - `("kline", interval(s), symbol(s))`, the only family with a fixed prefix

use std::fmt;

use crate::Result;
use crate::error::Error;
use crate::types::{KlineInterval, SubType};

/// One side of a shape: a single value or a list of values.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeArg {
    One(String),
    Many(Vec<String>),
}

impl ShapeArg {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

impl From<&str> for ShapeArg {
    fn from(value: &str) -> Self {
        Self::One(value.to_owned())
    }
}

impl From<String> for ShapeArg {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<SubType> for ShapeArg {
    fn from(subtype: SubType) -> Self {
        Self::One(subtype.to_string())
    }
}

impl From<KlineInterval> for ShapeArg {
    fn from(interval: KlineInterval) -> Self {
        Self::One(interval.to_string())
    }
}

impl<T: fmt::Display> From<Vec<T>> for ShapeArg {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: fmt::Display, const N: usize> From<[T; N]> for ShapeArg {
    fn from(values: [T; N]) -> Self {
        Self::Many(values.iter().map(ToString::to_string).collect())
    }
}

/// A single subscription shape of arity 1, 2 or 3.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape(pub Vec<ShapeArg>);

impl Shape {
    #[must_use]
    pub fn new(args: Vec<ShapeArg>) -> Self {
        Self(args)
    }

    /// Expand into primitive requests, in row-major order.
    ///
    /// Fails with [`Kind::Validation`](crate::error::Kind::Validation) for an
    /// arity other than 1, 2 or 3 or a three-argument shape not led by `kline`,
    /// and with [`Kind::UnsupportedSubType`](crate::error::Kind::UnsupportedSubType)
    /// for an unknown subtype name.
    pub fn expand(self) -> Result<Vec<SubscriptionParam>> {
        let arity = self.0.len();
        let mut args = self.0.into_iter();

        match (arity, args.next(), args.next(), args.next()) {
            (1, Some(subtypes), _, _) => subtypes
                .into_vec()
                .iter()
                .map(|subtype| -> Result<SubscriptionParam> {
                    Ok(SubscriptionParam::new(subtype.parse()?, Vec::new()))
                })
                .collect(),
            (2, Some(subtypes), Some(params), _) => {
                let params = params.into_vec();
                let mut expanded = Vec::new();
                for subtype in subtypes.into_vec() {
                    let subtype: SubType = subtype.parse()?;
                    expanded.extend(
                        params
                            .iter()
                            .map(|param| SubscriptionParam::new(subtype, vec![param.clone()])),
                    );
                }
                Ok(expanded)
            }
            (3, Some(ShapeArg::One(prefix)), Some(intervals), Some(symbols))
                if prefix == SubType::Kline.to_string() =>
            {
                let symbols = symbols.into_vec();
                Ok(intervals
                    .into_vec()
                    .into_iter()
                    .flat_map(|interval| {
                        symbols.iter().map(move |symbol| {
                            SubscriptionParam::new(
                                SubType::Kline,
                                vec![interval.clone(), symbol.clone()],
                            )
                        })
                    })
                    .collect())
            }
            (3, ..) => Err(Error::validation(
                "only `kline` takes three arguments: (kline, interval(s), symbol(s))",
            )),
            _ => Err(Error::validation(format!(
                "a subscription shape takes 1 to 3 arguments, got {arity}"
            ))),
        }
    }
}

impl<A: Into<ShapeArg>> From<(A,)> for Shape {
    fn from((subtypes,): (A,)) -> Self {
        Self(vec![subtypes.into()])
    }
}

impl<A: Into<ShapeArg>, B: Into<ShapeArg>> From<(A, B)> for Shape {
    fn from((subtypes, params): (A, B)) -> Self {
        Self(vec![subtypes.into(), params.into()])
    }
}

impl<A: Into<ShapeArg>, B: Into<ShapeArg>, C: Into<ShapeArg>> From<(A, B, C)> for Shape {
    fn from((prefix, intervals, symbols): (A, B, C)) -> Self {
        Self(vec![prefix.into(), intervals.into(), symbols.into()])
    }
}

/// One or more shapes passed to a single subscribe call.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shapes(pub Vec<Shape>);

impl Shapes {
    /// Expand every shape, failing before anything is produced if one is invalid.
    pub fn expand(self) -> Result<Vec<SubscriptionParam>> {
        let mut expanded = Vec::new();
        for shape in self.0 {
            expanded.extend(shape.expand()?);
        }
        Ok(expanded)
    }
}

impl From<Shape> for Shapes {
    fn from(shape: Shape) -> Self {
        Self(vec![shape])
    }
}

impl<A: Into<ShapeArg>> From<(A,)> for Shapes {
    fn from(shape: (A,)) -> Self {
        Self(vec![shape.into()])
    }
}

impl<A: Into<ShapeArg>, B: Into<ShapeArg>> From<(A, B)> for Shapes {
    fn from(shape: (A, B)) -> Self {
        Self(vec![shape.into()])
    }
}

impl<A: Into<ShapeArg>, B: Into<ShapeArg>, C: Into<ShapeArg>> From<(A, B, C)> for Shapes {
    fn from(shape: (A, B, C)) -> Self {
        Self(vec![shape.into()])
    }
}

impl<S: Into<Shape>> From<Vec<S>> for Shapes {
    fn from(shapes: Vec<S>) -> Self {
        Self(shapes.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<Shape>, const N: usize> From<[S; N]> for Shapes {
    fn from(shapes: [S; N]) -> Self {
        Self(shapes.into_iter().map(Into::into).collect())
    }
}

/// A primitive request: one subtype and the arguments its stream name needs.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionParam {
    pub subtype: SubType,
    /// `[symbol]`, `[interval, symbol]` for klines, or empty for all-market families
    pub args: Vec<String>,
}

impl SubscriptionParam {
    #[must_use]
    pub fn new(subtype: SubType, args: Vec<String>) -> Self {
        Self { subtype, args }
    }
}
