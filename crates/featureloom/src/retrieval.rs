//! Online feature retrieval
//!
//! Turns feature references (or a feature service) plus entity rows into a
//! columnar response:
//!
//! 1. Resolve every reference against the registry snapshot; a feature that
//!    is not in its view's schema fails the request.
//! 2. Name the output columns (`feature` or `view__feature`) and reject
//!    duplicates.
//! 3. Collect the on-demand views involved, including ones only reached as
//!    dependencies, and the stored features they consume. Those are fetched
//!    even when not requested, but only requested features are returned.
//! 4. Check request-time fields, then fetch every stored feature view once,
//!    concurrently, deduplicating entity keys.
//! 5. Run transformations in dependency order and assemble the response in
//!    entity-row order.
//!
//! Missing or expired values are `Value::Null`; only structural problems
//! (unknown names, collisions, missing request data) fail the call.

use featureloom_core::{
    full_feature_name, timestamp_column, EntityKey, Error, FeatureRef, FeatureView,
    FeatureViewProjection, ObjectKind, OnDemandFeatureView, OnlineReadRow, OnlineStore,
    OnlineTable, Result, RowBatch, StoredValue, TransformationRegistry, Value,
};
use featureloom_registry::ProjectCatalog;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// One entity row: join keys and request-time fields by column name
pub type EntityRow = BTreeMap<String, Value>;

/// Build an entity row from `(column, value)` pairs
pub fn entity_row<I, K, V>(pairs: I) -> EntityRow
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// What to retrieve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSelection {
    /// `view:feature` references
    Refs(Vec<String>),
    /// Every projection of a feature service
    Service(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnlineFeaturesRequest {
    pub features: FeatureSelection,
    pub entity_rows: Vec<EntityRow>,
    /// Name outputs `view__feature` instead of `feature`
    pub full_feature_names: bool,
    /// Add a `<name>__ts` event timestamp column per stored feature
    pub include_event_timestamps: bool,
}

impl OnlineFeaturesRequest {
    pub fn refs<I, S>(refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FeatureSelection::Refs(refs.into_iter().map(Into::into).collect()))
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(FeatureSelection::Service(name.into()))
    }

    fn new(features: FeatureSelection) -> Self {
        Self {
            features,
            entity_rows: Vec::new(),
            full_feature_names: false,
            include_event_timestamps: false,
        }
    }

    pub fn with_entity_row(mut self, row: EntityRow) -> Self {
        self.entity_rows.push(row);
        self
    }

    pub fn with_entity_rows(mut self, rows: impl IntoIterator<Item = EntityRow>) -> Self {
        self.entity_rows.extend(rows);
        self
    }

    pub fn with_full_feature_names(mut self, full: bool) -> Self {
        self.full_feature_names = full;
        self
    }

    pub fn with_event_timestamps(mut self, include: bool) -> Self {
        self.include_event_timestamps = include;
        self
    }
}

/// Columnar response, one value per entity row in every column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnlineFeaturesResponse {
    /// Column names in response order: echoed entity row columns, then features
    pub field_names: Vec<String>,
    pub columns: BTreeMap<String, Vec<Value>>,
    pub num_rows: usize,
}

impl OnlineFeaturesResponse {
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Row-oriented view of the response
    pub fn to_rows(&self) -> Vec<BTreeMap<String, Value>> {
        (0..self.num_rows)
            .map(|i| {
                self.columns
                    .iter()
                    .map(|(name, values)| (name.clone(), values[i].clone()))
                    .collect()
            })
            .collect()
    }

    fn push_column(&mut self, name: String, values: Vec<Value>) {
        if self.columns.insert(name.clone(), values).is_none() {
            self.field_names.push(name);
        }
    }
}

#[derive(Clone, Copy)]
enum ViewRef<'s> {
    Stored(&'s FeatureView),
    OnDemand(&'s OnDemandFeatureView),
}

impl<'s> ViewRef<'s> {
    fn has_feature(&self, feature: &str) -> bool {
        match self {
            Self::Stored(fv) => fv.feature(feature).is_some(),
            Self::OnDemand(odfv) => odfv.feature(feature).is_some(),
        }
    }

    fn feature_names(&self) -> Vec<String> {
        match self {
            Self::Stored(fv) => fv.feature_names().map(str::to_string).collect(),
            Self::OnDemand(odfv) => odfv.features.iter().map(|f| f.name.clone()).collect(),
        }
    }
}

struct Requested<'s> {
    projection: FeatureViewProjection,
    view: ViewRef<'s>,
}

/// A stored view fetched under one join-key mapping
type FetchKey = (String, BTreeMap<String, String>);

fn fetch_key(projection: &FeatureViewProjection) -> FetchKey {
    (projection.view_name.clone(), projection.join_key_map.clone())
}

/// Output column of one requested feature
struct Output {
    requested: usize,
    feature: String,
    name: String,
}

/// Read-only retrieval pipeline over one registry snapshot
pub struct Retrieval<'a> {
    project: &'a str,
    catalog: &'a ProjectCatalog,
    online: &'a dyn OnlineStore,
    transformations: &'a TransformationRegistry,
}

impl<'a> Retrieval<'a> {
    pub fn new(
        project: &'a str,
        catalog: &'a ProjectCatalog,
        online: &'a dyn OnlineStore,
        transformations: &'a TransformationRegistry,
    ) -> Self {
        Self {
            project,
            catalog,
            online,
            transformations,
        }
    }

    pub async fn get_online_features(
        &self,
        request: &OnlineFeaturesRequest,
    ) -> Result<OnlineFeaturesResponse> {
        let requested = self.resolve(&request.features)?;
        let outputs = output_names(&requested, request.full_feature_names)?;
        let echoed = echo_columns(&request.entity_rows);
        check_echo_collisions(&echoed, &requested, &outputs, request.include_event_timestamps)?;

        let on_demand = self.on_demand_closure(&requested)?;
        let fetch_plan = self.fetch_plan(&requested, &on_demand)?;
        check_request_data(&on_demand, &request.entity_rows)?;

        let fetched = self.fetch(&fetch_plan, &request.entity_rows).await?;
        let computed = self.run_transformations(&on_demand, &fetched, &request.entity_rows)?;

        let mut response = OnlineFeaturesResponse {
            num_rows: request.entity_rows.len(),
            ..Default::default()
        };
        for column in echoed {
            let values = request
                .entity_rows
                .iter()
                .map(|row| row.get(&column).cloned().unwrap_or_default())
                .collect();
            response.push_column(column, values);
        }

        for output in outputs {
            let requested = &requested[output.requested];
            match requested.view {
                ViewRef::Stored(_) => {
                    let cells = stored_cells(
                        &fetched,
                        &requested.projection,
                        &output.feature,
                        response.num_rows,
                    );
                    let values = cells
                        .iter()
                        .map(|cell| cell.map(|c| c.value.clone()).unwrap_or_default())
                        .collect();
                    if request.include_event_timestamps {
                        let timestamps = cells
                            .iter()
                            .map(|cell| {
                                cell.map_or(Value::Null, |c| Value::UnixTimestamp(c.event_timestamp))
                            })
                            .collect();
                        response.push_column(output.name.clone(), values);
                        response.push_column(timestamp_column(&output.name), timestamps);
                    } else {
                        response.push_column(output.name, values);
                    }
                }
                ViewRef::OnDemand(odfv) => {
                    let values = computed
                        .get(&odfv.name)
                        .and_then(|columns| columns.get(&output.feature))
                        .cloned()
                        .unwrap_or_else(|| vec![Value::Null; response.num_rows]);
                    response.push_column(output.name, values);
                }
            }
        }

        debug!(
            project = self.project,
            rows = response.num_rows,
            columns = response.field_names.len(),
            fetched_views = fetched.len(),
            on_demand_views = on_demand.len(),
            "Retrieved online features"
        );
        Ok(response)
    }

    fn lookup_view(&self, name: &str) -> Result<ViewRef<'a>> {
        if let Some(fv) = self.catalog.stored_view(name) {
            return Ok(ViewRef::Stored(fv));
        }
        if let Some(odfv) = self.catalog.on_demand_feature_views.get(name) {
            return Ok(ViewRef::OnDemand(odfv));
        }
        Err(Error::not_found(ObjectKind::FeatureView, name, self.project))
    }

    fn stored_view(&self, name: &str) -> Result<&'a FeatureView> {
        self.catalog
            .stored_view(name)
            .ok_or_else(|| Error::not_found(ObjectKind::FeatureView, name, self.project))
    }

    /// Requested projections with their feature lists filled in and checked
    fn resolve(&self, selection: &FeatureSelection) -> Result<Vec<Requested<'a>>> {
        let projections = match selection {
            FeatureSelection::Refs(refs) => {
                let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
                for reference in refs {
                    let FeatureRef { view, feature } = FeatureRef::parse(reference)?;
                    match grouped.iter_mut().find(|(v, _)| *v == view) {
                        Some((_, features)) if features.contains(&feature) => {}
                        Some((_, features)) => features.push(feature),
                        None => grouped.push((view, vec![feature])),
                    }
                }
                grouped
                    .into_iter()
                    .map(|(view, features)| FeatureViewProjection::of(view).with_features(features))
                    .collect::<Vec<_>>()
            }
            FeatureSelection::Service(name) => self
                .catalog
                .feature_services
                .get(name)
                .ok_or_else(|| {
                    Error::not_found(ObjectKind::FeatureService, name.as_str(), self.project)
                })?
                .projections
                .clone(),
        };

        projections
            .into_iter()
            .map(|mut projection| {
                let view = self.lookup_view(&projection.view_name)?;
                if projection.selects_all() {
                    projection.features = view.feature_names();
                }
                for feature in &projection.features {
                    if !view.has_feature(feature) {
                        return Err(Error::FeatureNotInView {
                            feature: feature.clone(),
                            view: projection.view_name.clone(),
                        });
                    }
                }
                Ok(Requested { projection, view })
            })
            .collect()
    }

    /// Every on-demand view needed, dependencies before dependents
    fn on_demand_closure(
        &self,
        requested: &[Requested<'a>],
    ) -> Result<Vec<&'a OnDemandFeatureView>> {
        let mut ordered = Vec::new();
        let mut done = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        for r in requested {
            if let ViewRef::OnDemand(odfv) = r.view {
                self.visit(odfv, &mut ordered, &mut done, &mut visiting)?;
            }
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        odfv: &'a OnDemandFeatureView,
        ordered: &mut Vec<&'a OnDemandFeatureView>,
        done: &mut BTreeSet<String>,
        visiting: &mut BTreeSet<String>,
    ) -> Result<()> {
        if done.contains(&odfv.name) {
            return Ok(());
        }
        if !visiting.insert(odfv.name.clone()) {
            return Err(Error::invalid_input(format!(
                "on demand feature view '{}' depends on itself",
                odfv.name
            )));
        }
        for source in odfv.on_demand_sources() {
            let dependency = self
                .catalog
                .on_demand_feature_views
                .get(&source.view_name)
                .ok_or_else(|| {
                    Error::not_found(
                        ObjectKind::OnDemandFeatureView,
                        source.view_name.as_str(),
                        self.project,
                    )
                })?;
            self.visit(dependency, ordered, done, visiting)?;
        }
        visiting.remove(&odfv.name);
        done.insert(odfv.name.clone());
        ordered.push(odfv);
        Ok(())
    }

    /// Stored features to read, per view and join-key mapping
    fn fetch_plan(
        &self,
        requested: &[Requested<'a>],
        on_demand: &[&'a OnDemandFeatureView],
    ) -> Result<BTreeMap<FetchKey, BTreeSet<String>>> {
        let mut plan: BTreeMap<FetchKey, BTreeSet<String>> = BTreeMap::new();
        for r in requested {
            if let ViewRef::Stored(_) = r.view {
                plan.entry(fetch_key(&r.projection))
                    .or_default()
                    .extend(r.projection.features.iter().cloned());
            }
        }
        for odfv in on_demand {
            for source in odfv.feature_view_sources() {
                let view = self.stored_view(&source.view_name)?;
                let features = plan.entry(fetch_key(source)).or_default();
                if source.selects_all() {
                    features.extend(view.feature_names().map(str::to_string));
                } else {
                    features.extend(source.features.iter().cloned());
                }
            }
        }
        Ok(plan)
    }

    /// Read every planned view concurrently; results are per entity row
    async fn fetch(
        &self,
        plan: &BTreeMap<FetchKey, BTreeSet<String>>,
        entity_rows: &[EntityRow],
    ) -> Result<HashMap<FetchKey, Vec<OnlineReadRow>>> {
        let reads = plan.iter().map(|(key, features)| async move {
            let (view_name, join_key_map) = key;
            let view = self.stored_view(view_name)?;
            let keys = self.entity_keys(view, join_key_map, entity_rows)?;

            // Deduplicate keys; `slots[i]` is row i's index into `unique`
            let mut unique: Vec<EntityKey> = Vec::new();
            let mut index: HashMap<String, usize> = HashMap::new();
            let slots: Vec<usize> = keys
                .into_iter()
                .map(|key| {
                    *index.entry(key.storage_key()).or_insert_with(|| {
                        unique.push(key);
                        unique.len() - 1
                    })
                })
                .collect();

            let features: Vec<String> = features.iter().cloned().collect();
            let rows = self
                .online
                .online_read(self.project, &OnlineTable::from(view), &unique, &features)
                .await?;
            let per_row = slots
                .into_iter()
                .map(|slot| rows.get(slot).cloned().unwrap_or_default())
                .collect::<Vec<_>>();
            Ok::<_, Error>((key.clone(), per_row))
        });

        Ok(try_join_all(reads).await?.into_iter().collect())
    }

    /// Entity key of every row for `view`, honouring the join-key mapping
    fn entity_keys(
        &self,
        view: &FeatureView,
        join_key_map: &BTreeMap<String, String>,
        entity_rows: &[EntityRow],
    ) -> Result<Vec<EntityKey>> {
        let mut join_keys = Vec::new();
        for entity_name in &view.entities {
            let entity = self
                .catalog
                .entities
                .get(entity_name)
                .ok_or_else(|| {
                    Error::not_found(ObjectKind::Entity, entity_name.as_str(), self.project)
                })?;
            for join_key in &entity.join_keys {
                join_keys.push((join_key.as_str(), entity.value_type));
            }
        }

        entity_rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let pairs = join_keys
                    .iter()
                    .map(|(join_key, value_type)| {
                        let column = join_key_map
                            .get(*join_key)
                            .map(String::as_str)
                            .unwrap_or(join_key);
                        let value = row.get(column).cloned().ok_or_else(|| {
                            Error::invalid_input(format!(
                                "entity row {} has no '{}' column for join key '{}' of feature view '{}'",
                                i, column, join_key, view.name
                            ))
                        })?;
                        let value = match value_type {
                            Some(ty) => value.coerce(*ty)?,
                            None => value,
                        };
                        Ok((join_key.to_string(), value))
                    })
                    .collect::<Result<Vec<_>>>()?;
                EntityKey::new(pairs)
            })
            .collect()
    }

    /// Run on-demand views in order; returns output columns per view
    fn run_transformations(
        &self,
        on_demand: &[&'a OnDemandFeatureView],
        fetched: &HashMap<FetchKey, Vec<OnlineReadRow>>,
        entity_rows: &[EntityRow],
    ) -> Result<HashMap<String, BTreeMap<String, Vec<Value>>>> {
        let num_rows = entity_rows.len();
        let mut computed: HashMap<String, BTreeMap<String, Vec<Value>>> = HashMap::new();

        for odfv in on_demand {
            let transform = self.transformations.get(&odfv.transformation)?;
            let mut input = RowBatch::new(num_rows);

            for source in odfv.feature_view_sources() {
                let features = if source.selects_all() {
                    self.stored_view(&source.view_name)?
                        .feature_names()
                        .map(str::to_string)
                        .collect()
                } else {
                    source.features.clone()
                };
                for feature in features {
                    let values: Vec<Value> = stored_cells(fetched, source, &feature, num_rows)
                        .into_iter()
                        .map(|cell| cell.map(|c| c.value.clone()).unwrap_or_default())
                        .collect();
                    add_input(&mut input, source, &feature, values)?;
                }
            }

            for source in odfv.on_demand_sources() {
                if let Some(columns) = computed.get(&source.view_name) {
                    for (feature, values) in columns {
                        if source.selects_all() || source.features.contains(feature) {
                            add_input(&mut input, source, feature, values.clone())?;
                        }
                    }
                }
            }

            for (field, ty) in odfv.request_data_schema() {
                let values = entity_rows
                    .iter()
                    .map(|row| row.get(&field).cloned().unwrap_or_default().coerce(ty))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| {
                        Error::invalid_input(format!("request field '{}': {}", field, e))
                    })?;
                input.insert_column(field, values)?;
            }

            let output = transform.transform(&input)?;
            if output.num_rows() != num_rows {
                return Err(Error::invalid_input(format!(
                    "transformation '{}' returned {} rows for {} input rows",
                    odfv.transformation,
                    output.num_rows(),
                    num_rows
                )));
            }

            let mut columns = BTreeMap::new();
            for field in &odfv.features {
                let values = output.column(&field.name).ok_or_else(|| {
                    Error::invalid_input(format!(
                        "transformation '{}' did not produce feature '{}' of '{}'",
                        odfv.transformation, field.name, odfv.name
                    ))
                })?;
                let values = values
                    .iter()
                    .cloned()
                    .map(|v| v.coerce(field.dtype))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| {
                        Error::invalid_input(format!(
                            "feature '{}' of '{}': {}",
                            field.name, odfv.name, e
                        ))
                    })?;
                columns.insert(field.name.clone(), values);
            }
            computed.insert(odfv.name.clone(), columns);
        }
        Ok(computed)
    }
}

/// Feed a dependency column under its bare name (first source wins) and its
/// full `view__feature` name
fn add_input(
    input: &mut RowBatch,
    source: &FeatureViewProjection,
    feature: &str,
    values: Vec<Value>,
) -> Result<()> {
    if input.column(feature).is_none() {
        input.insert_column(feature, values.clone())?;
    }
    input.insert_column(full_feature_name(source.name_to_use(), feature), values)
}

fn stored_cells<'f>(
    fetched: &'f HashMap<FetchKey, Vec<OnlineReadRow>>,
    projection: &FeatureViewProjection,
    feature: &str,
    num_rows: usize,
) -> Vec<Option<&'f StoredValue>> {
    match fetched.get(&fetch_key(projection)) {
        Some(rows) => rows.iter().map(|row| row.get(feature)).collect(),
        None => vec![None; num_rows],
    }
}

/// Output names in request order; duplicates are a collision
fn output_names(requested: &[Requested<'_>], full_feature_names: bool) -> Result<Vec<Output>> {
    let outputs: Vec<Output> = requested
        .iter()
        .enumerate()
        .flat_map(|(i, r)| {
            r.projection.features.iter().map(move |feature| Output {
                requested: i,
                feature: feature.clone(),
                name: if full_feature_names {
                    full_feature_name(r.projection.name_to_use(), feature)
                } else {
                    feature.clone()
                },
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    let collisions: BTreeSet<String> = outputs
        .iter()
        .filter(|o| !seen.insert(o.name.as_str()))
        .map(|o| o.name.clone())
        .collect();
    if !collisions.is_empty() {
        return Err(Error::FeatureNameCollision(collisions.into_iter().collect()));
    }
    Ok(outputs)
}

/// Every request-time field must be present in every entity row
fn check_request_data(on_demand: &[&OnDemandFeatureView], entity_rows: &[EntityRow]) -> Result<()> {
    let missing: BTreeSet<String> = on_demand
        .iter()
        .flat_map(|odfv| odfv.request_data_schema().into_keys())
        .filter(|field| entity_rows.iter().any(|row| !row.contains_key(field)))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::RequestDataNotFound(missing.into_iter().collect()))
    }
}

/// Entity row columns echoed into the response, in first-seen order
/// Entity row columns are echoed unchanged, so no output may reuse their names
fn check_echo_collisions(
    echoed: &[String],
    requested: &[Requested<'_>],
    outputs: &[Output],
    with_timestamps: bool,
) -> Result<()> {
    let mut produced = BTreeSet::new();
    for output in outputs {
        produced.insert(output.name.clone());
        if with_timestamps && matches!(requested[output.requested].view, ViewRef::Stored(_)) {
            produced.insert(timestamp_column(&output.name));
        }
    }
    let collisions: Vec<String> = echoed
        .iter()
        .filter(|column| produced.contains(*column))
        .cloned()
        .collect();
    if collisions.is_empty() {
        Ok(())
    } else {
        Err(Error::FeatureNameCollision(collisions))
    }
}

fn echo_columns(entity_rows: &[EntityRow]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    entity_rows
        .iter()
        .flat_map(|row| row.keys())
        .filter(|k| seen.insert(k.as_str()))
        .cloned()
        .collect()
}
