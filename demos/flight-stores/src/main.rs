//! # Flight Stores Example
//!
//! Three stores behind one dispatcher:
//! - `CountryStore` tracks the selected country
//! - `CityStore` picks a default city when the country changes
//! - `PriceStore` prices the selected city
//!
//! Each store names the stores it reads with `wait_for`, so a country
//! update lands as Country, City, then Price no matter how the stores were
//! registered.
//!
//! Run with `RUST_LOG=lockstep=trace` to see every invocation.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use lockstep::{Callback, DispatchToken, Dispatcher, Envelope};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum FlightAction {
    #[serde(rename_all = "camelCase")]
    CountryUpdate { selected_country: String },
    #[serde(rename_all = "camelCase")]
    CityUpdate { selected_city: String },
}

type Payload = Envelope<FlightAction>;

// ============================================================================
// Stores
// ============================================================================

#[derive(Clone, Default)]
struct CountryStore {
    country: Rc<RefCell<Option<String>>>,
}

impl Callback<Payload> for CountryStore {
    fn handle(&self, payload: &Payload, _: &Dispatcher<Payload>) -> Result<()> {
        if let FlightAction::CountryUpdate { selected_country } = &payload.action {
            *self.country.borrow_mut() = Some(selected_country.clone());
        }
        Ok(())
    }
}

#[derive(Clone)]
struct CityStore {
    city: Rc<RefCell<Option<String>>>,
    countries: CountryStore,
    country_token: DispatchToken,
}

impl CityStore {
    fn default_city_for(country: &str) -> &'static str {
        match country {
            "AU" => "sydney",
            "FR" => "paris",
            "JP" => "tokyo",
            _ => "unknown",
        }
    }
}

impl Callback<Payload> for CityStore {
    fn handle(&self, payload: &Payload, dispatcher: &Dispatcher<Payload>) -> Result<()> {
        match &payload.action {
            FlightAction::CountryUpdate { .. } => {
                dispatcher.wait_for([self.country_token])?;
                let city = self
                    .countries
                    .country
                    .borrow()
                    .as_deref()
                    .map(|c| Self::default_city_for(c).to_string());
                *self.city.borrow_mut() = city;
            }
            FlightAction::CityUpdate { selected_city } => {
                *self.city.borrow_mut() = Some(selected_city.clone());
            }
        }
        Ok(())
    }
}

struct PriceStore {
    price: Rc<RefCell<Option<u32>>>,
    countries: CountryStore,
    cities: CityStore,
    city_token: DispatchToken,
}

impl Callback<Payload> for PriceStore {
    fn handle(&self, _: &Payload, dispatcher: &Dispatcher<Payload>) -> Result<()> {
        dispatcher.wait_for([self.city_token])?;
        let country = self.countries.country.borrow();
        let city = self.cities.city.borrow();
        if let (Some(country), Some(city)) = (country.as_deref(), city.as_deref()) {
            *self.price.borrow_mut() = Some(flight_price(country, city));
        }
        Ok(())
    }
}

fn flight_price(country: &str, city: &str) -> u32 {
    let base = match country {
        "AU" => 1_400,
        "JP" => 900,
        _ => 600,
    };
    base + city.len() as u32 * 25
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lockstep=debug".parse()?))
        .init();

    let dispatcher: Dispatcher<Payload> = Dispatcher::new();
    info!(enforcement = ?dispatcher.enforcement(), "dispatcher ready");

    let countries = CountryStore::default();
    let country_token = dispatcher.register_callback(countries.clone())?;

    let cities = CityStore {
        city: Rc::default(),
        countries: countries.clone(),
        country_token,
    };
    let city_token = dispatcher.register_callback(cities.clone())?;

    let price = Rc::new(RefCell::new(None));
    dispatcher.register_callback(PriceStore {
        price: price.clone(),
        countries: countries.clone(),
        cities: cities.clone(),
        city_token,
    })?;

    let actions = [
        FlightAction::CountryUpdate {
            selected_country: "AU".into(),
        },
        FlightAction::CityUpdate {
            selected_city: "melbourne".into(),
        },
        FlightAction::CountryUpdate {
            selected_country: "JP".into(),
        },
    ];

    for action in actions {
        info!(action = %serde_json::to_string(&action)?, "dispatching view action");
        dispatcher.dispatch_view_action(action)?;
        info!(
            country = ?countries.country.borrow(),
            city = ?cities.city.borrow(),
            price = ?price.borrow(),
            "stores settled"
        );
    }

    Ok(())
}
