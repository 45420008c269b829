use safe_keeper_domain::{
    extra::{AccountPlanExtra, NetworkStatusExtra},
    network::{AccountPlan, NetworkInfo},
    request::Request,
};

use super::{Dispatcher, Outcome, Result};

impl Dispatcher {
    pub(super) async fn update_network_status(&self, request: &Request) -> Result<Outcome> {
        let Ok(extra) = NetworkStatusExtra::decode(request.extra()) else {
            return Ok(Outcome::rejected("malformed network status"));
        };

        if let Some(latest) = self.store.read_latest_network_info(extra.chain).await? {
            if extra.height < latest.height() {
                return Ok(Outcome::rejected(format!(
                    "height {} behind {}",
                    extra.height,
                    latest.height()
                )));
            }
        }

        let info = NetworkInfo::builder()
            .request_id(request.id())
            .chain(extra.chain)
            .fee_rate(extra.fee_rate)
            .height(extra.height)
            .hash(extra.hash)
            .created_at(request.created_at())
            .build();

        self.store.write_network_info_from_request(request, &info).await?;

        Ok(Outcome::Committed)
    }

    pub(super) async fn set_account_plan(&self, request: &Request) -> Result<Outcome> {
        let Ok(extra) = AccountPlanExtra::decode(request.extra()) else {
            return Ok(Outcome::rejected("malformed account plan"));
        };

        let plan = AccountPlan::builder()
            .chain(extra.chain)
            .price_asset(extra.price_asset)
            .price_amount(extra.price_amount)
            .transaction_minimum(extra.transaction_minimum)
            .request_id(request.id())
            .created_at(request.created_at())
            .build();

        self.store.write_account_plan_from_request(request, &plan).await?;

        Ok(Outcome::Committed)
    }
}
