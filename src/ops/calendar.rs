//! Calendar field extraction from unix-timestamp samplings.
use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{Attributes, DType, GraphError, GraphStore, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarUnit {
    Second,
    Minute,
    Hour,
    /// Monday is 0.
    DayOfWeek,
    DayOfMonth,
    DayOfYear,
    IsoWeek,
    Month,
    Year,
}

impl CalendarUnit {
    pub const ALL: [CalendarUnit; 9] = [
        CalendarUnit::Second,
        CalendarUnit::Minute,
        CalendarUnit::Hour,
        CalendarUnit::DayOfWeek,
        CalendarUnit::DayOfMonth,
        CalendarUnit::DayOfYear,
        CalendarUnit::IsoWeek,
        CalendarUnit::Month,
        CalendarUnit::Year,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CalendarUnit::Second => "CALENDAR_SECOND",
            CalendarUnit::Minute => "CALENDAR_MINUTE",
            CalendarUnit::Hour => "CALENDAR_HOUR",
            CalendarUnit::DayOfWeek => "CALENDAR_DAY_OF_WEEK",
            CalendarUnit::DayOfMonth => "CALENDAR_DAY_OF_MONTH",
            CalendarUnit::DayOfYear => "CALENDAR_DAY_OF_YEAR",
            CalendarUnit::IsoWeek => "CALENDAR_ISO_WEEK",
            CalendarUnit::Month => "CALENDAR_MONTH",
            CalendarUnit::Year => "CALENDAR_YEAR",
        }
    }

    pub fn feature_name(self) -> &'static str {
        match self {
            CalendarUnit::Second => "calendar_second",
            CalendarUnit::Minute => "calendar_minute",
            CalendarUnit::Hour => "calendar_hour",
            CalendarUnit::DayOfWeek => "calendar_day_of_week",
            CalendarUnit::DayOfMonth => "calendar_day_of_month",
            CalendarUnit::DayOfYear => "calendar_day_of_year",
            CalendarUnit::IsoWeek => "calendar_iso_week",
            CalendarUnit::Month => "calendar_month",
            CalendarUnit::Year => "calendar_year",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|u| u.key() == key)
    }
}

pub struct CalendarOperator(pub CalendarUnit);

impl OperatorKind for CalendarOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(self.0.key()).input("input").output("output")
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let input = ctx.require_input("input")?;
        if !ctx.sampling_of(input).is_unix_timestamp() {
            return Err(ctx.invalid(
                "calendar operators need unix timestamps; declare the input with unix_timestamps(true)",
            ));
        }
        Ok(())
    }

    fn output_schema(&self, _ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let features = vec![OutputFeature::created(self.0.feature_name(), DType::Int32)];
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input"))])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    for unit in CalendarUnit::ALL {
        builder.register_operator(CalendarOperator(unit))?;
    }
    Ok(())
}

pub fn calendar(g: &mut GraphStore, unit: CalendarUnit, input: NodeId) -> Result<NodeId, GraphError> {
    g.apply_single(unit.key(), &[("input", input)], Attributes::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::standard_registry;
    use crate::store::InputSpec;
    use rstest::rstest;

    #[rstest]
    #[case(DType::Float64)]
    #[case(DType::String)]
    #[case(DType::Boolean)]
    fn test_hour_is_integer_regardless_of_input(#[case] dtype: DType) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("f", dtype).unix_timestamps(true)).unwrap();
        let out = calendar(&mut g, CalendarUnit::Hour, a).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.feature_names(), vec!["calendar_hour"]);
        assert_eq!(node.features()[0].dtype(), DType::Int32);
        assert_eq!(node.sampling(), g.node(a).unwrap().sampling());
    }

    #[test]
    fn test_requires_unix_timestamps() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("f", DType::Float64)).unwrap();
        assert!(matches!(calendar(&mut g, CalendarUnit::Year, a), Err(GraphError::InvalidArguments { .. })));
    }
}
