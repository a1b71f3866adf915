//! `meshwork route` — Route table introspection.

use meshwork_core::form::{Form, GetRoutes};

use super::{CmdResult, Context};

pub async fn list(ctx: &Context) -> CmdResult {
    let (client, endpoint) = ctx.control()?;
    let reply = client
        .send(&endpoint, &Form::GetRoutes(GetRoutes::default()))
        .await?;

    let Form::GetRoutes(f) = reply else {
        return Err("unexpected reply".into());
    };
    if let Some(err) = f.error {
        return Err(format!("list failed: {err}").into());
    }

    if f.routes.is_empty() {
        println!("No learned routes");
        return Ok(());
    }
    for route in f.routes {
        println!(
            "{}  via {}  weight {}",
            route.agtuuid, route.gtwuuid, route.weight
        );
    }
    Ok(())
}
