//! IRIs of the chrontext vocabulary.

/// The chrontext vocabulary namespace.
pub mod ct {
    use oxrdf::NamedNodeRef;

    pub const NAMESPACE: &str = "https://github.com/DataTreehouse/chrontext#";

    /// Links a timeseries to a (virtual) data point.
    pub const HAS_DATA_POINT: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "https://github.com/DataTreehouse/chrontext#hasDataPoint",
    );
    /// Links a data point to its (virtual) value.
    pub const HAS_VALUE: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "https://github.com/DataTreehouse/chrontext#hasValue",
    );
    /// Links a data point to its (virtual) timestamp.
    pub const HAS_TIMESTAMP: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "https://github.com/DataTreehouse/chrontext#hasTimestamp",
    );
    /// Links an asset to a timeseries node in the static graph.
    pub const HAS_TIMESERIES: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "https://github.com/DataTreehouse/chrontext#hasTimeseries",
    );
    /// Links a timeseries node to its backend identifier string.
    pub const HAS_EXTERNAL_ID: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "https://github.com/DataTreehouse/chrontext#hasExternalId",
    );
    /// Links a timeseries node to the name of the resource that serves it.
    pub const HAS_RESOURCE: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
        "https://github.com/DataTreehouse/chrontext#hasResource",
    );
    /// Floors a timestamp to the nearest multiple of a number of
    /// epoch-seconds.
    pub const FLOOR_DATE_TIME_TO_SECONDS_INTERVAL: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked(
            "https://github.com/DataTreehouse/chrontext#FloorDateTimeToSecondsInterval",
        );
    /// Aggregate taking the first value of a series within a group.
    pub const AGG_FIRST: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://github.com/DataTreehouse/chrontext#first");
    /// Aggregate taking the last value of a series within a group.
    pub const AGG_LAST: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://github.com/DataTreehouse/chrontext#last");
}
