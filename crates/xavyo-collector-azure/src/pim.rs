//! PIM schedule collection stage.

use serde::Serialize;
use tracing::{instrument, warn};

use crate::clients::ClientFactory;
use crate::model::{AssignmentState, Record};
use crate::pagination::read_all;
use crate::projection::project_pim_schedule;
use crate::timing::CollectionTimer;
use crate::{CollectorError, CollectorResult};

pub const ELIGIBILITY_SCHEDULES_PATH: &str = "/roleManagement/directory/roleEligibilitySchedules";
pub const ASSIGNMENT_SCHEDULES_PATH: &str = "/roleManagement/directory/roleAssignmentSchedules";

/// The `pim` section of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PimData {
    pub eligible_assignments: Vec<Record>,
    pub active_assignments: Vec<Record>,
}

impl PimData {
    #[must_use]
    pub fn total(&self) -> usize {
        self.eligible_assignments.len() + self.active_assignments.len()
    }
}

#[derive(Debug)]
pub struct PimStage<'a> {
    clients: &'a ClientFactory,
}

impl<'a> PimStage<'a> {
    #[must_use]
    pub fn new(clients: &'a ClientFactory) -> Self {
        Self { clients }
    }

    /// Collects eligibility and active assignment schedules. Either side is
    /// empty when its listing fails.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Cancelled` if the run is cancelled.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> CollectorResult<PimData> {
        Ok(PimData {
            eligible_assignments: self
                .read_schedules(
                    "eligible_assignments",
                    ELIGIBILITY_SCHEDULES_PATH,
                    AssignmentState::Eligible,
                )
                .await?,
            active_assignments: self
                .read_schedules(
                    "active_assignments",
                    ASSIGNMENT_SCHEDULES_PATH,
                    AssignmentState::Active,
                )
                .await?,
        })
    }

    async fn read_schedules(
        &self,
        collection: &str,
        path: &str,
        state: AssignmentState,
    ) -> CollectorResult<Vec<Record>> {
        let graph = self.clients.graph();
        let timer = CollectionTimer::start(collection);
        let url = graph.list_url(path, None);
        match read_all(graph, collection, &url, |value| project_pim_schedule(state, value)).await {
            Ok(records) => {
                timer.finish(records.len());
                Ok(records)
            }
            Err(CollectorError::Cancelled) => Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(collection = %collection, error = %e, "Collection failed, leaving it empty");
                Ok(Vec::new())
            }
        }
    }
}
