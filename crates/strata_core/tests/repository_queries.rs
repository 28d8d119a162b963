mod common;

use common::{repository, seed, service, unit_of_work, Customer, NOW};
use rusqlite::params;
use strata_core::{
    Auditable, Dialect, Filter, Identifiable, QuerySpec, RepoError, SortDirection, UnitOfWork,
};

fn names(customers: &[Customer]) -> Vec<String> {
    customers.iter().map(|customer| customer.name.clone()).collect()
}

fn seeded_unit(dialect: Dialect, count: usize) -> UnitOfWork {
    let repo = repository();
    let mut uow = unit_of_work(dialect);
    let mut customers: Vec<Customer> = (0..count)
        .map(|index| {
            Customer::new(&format!("customer-{index:02}"))
                .in_city(if index % 2 == 0 { "Oslo" } else { "Bergen" })
                .with_tier(i64::try_from(index).unwrap())
        })
        .collect();
    repo.insert_many(&mut uow, &mut customers).unwrap();
    uow.save().unwrap();
    uow
}

#[test]
fn get_all_pages_after_skip_under_stable_ordering() {
    for dialect in Dialect::ALL {
        let uow = seeded_unit(dialect, 10);
        let spec = QuerySpec::new().order_by_asc("id").skip(2).take(3);

        let page = repository().get_all(&uow, &spec).unwrap();

        assert_eq!(
            names(&page),
            vec!["customer-02", "customer-03", "customer-04"],
            "{dialect}"
        );
    }
}

#[test]
fn get_all_ignores_filter_but_get_applies_it() {
    let uow = seeded_unit(Dialect::MsSql, 6);
    let spec = QuerySpec::new()
        .filter(Filter::eq("city", "Oslo"))
        .order_by_asc("name");

    assert_eq!(repository().get_all(&uow, &spec).unwrap().len(), 6);
    assert_eq!(
        names(&repository().get(&uow, &spec).unwrap()),
        vec!["customer-00", "customer-02", "customer-04"]
    );
}

#[test]
fn composite_filters_and_descending_order() {
    let uow = seeded_unit(Dialect::PostgreSql, 8);
    let spec = QuerySpec::new()
        .filter(Filter::ge("tier", 3).and(Filter::eq("city", "Bergen").or(Filter::eq("tier", 6))))
        .order_by("tier", SortDirection::Descending);

    let rows = repository().get(&uow, &spec).unwrap();
    assert_eq!(
        names(&rows),
        vec!["customer-07", "customer-06", "customer-05", "customer-03"]
    );

    let spec = QuerySpec::new()
        .filter(Filter::like("name", "customer-0_").and(Filter::is_in("tier", vec![1_i64, 2, 42])))
        .order_by_asc("tier");
    assert_eq!(
        names(&repository().get(&uow, &spec).unwrap()),
        vec!["customer-01", "customer-02"]
    );

    let spec = QuerySpec::new().filter(Filter::eq("city", "Oslo").negate());
    assert_eq!(repository().get_count(&uow, &spec).unwrap(), 4);
}

#[test]
fn get_one_rejects_multiple_matches() {
    let uow = seeded_unit(Dialect::MySql, 4);
    let repo = repository();

    let one = repo
        .get_one(&uow, &QuerySpec::new().filter(Filter::eq("name", "customer-01")))
        .unwrap()
        .unwrap();
    assert_eq!(one.tier, 1);

    assert!(repo
        .get_one(&uow, &QuerySpec::new().filter(Filter::eq("name", "missing")))
        .unwrap()
        .is_none());

    let err = repo
        .get_one(&uow, &QuerySpec::new().filter(Filter::eq("city", "Oslo")))
        .unwrap_err();
    assert!(matches!(err, RepoError::MultipleResults { count: 2, .. }));
}

#[test]
fn get_first_follows_ordering() {
    let uow = seeded_unit(Dialect::MsSql, 5);
    let spec = QuerySpec::new()
        .filter(Filter::eq("city", "Bergen"))
        .order_by_desc("tier");

    let first = repository().get_first(&uow, &spec).unwrap().unwrap();
    assert_eq!(first.name, "customer-03");
}

#[test]
fn soft_deleted_rows_are_hidden_unless_requested() {
    for dialect in Dialect::ALL {
        let mut service = service(dialect);
        let mut customers = seed(&mut service, 4);
        service.delete_soft_one(&mut customers[1]).unwrap();

        let visible = QuerySpec::new();
        let all = QuerySpec::new().include_deleted(true);
        assert_eq!(service.get_count(&visible).unwrap(), 3, "{dialect}");
        assert_eq!(service.get_count(&all).unwrap(), 4, "{dialect}");
        assert_eq!(service.get_all(&visible).unwrap().len(), 3);
        assert_eq!(service.get_all(&all).unwrap().len(), 4);

        // Explicit filters never replace the visibility predicate.
        let deleted_name = QuerySpec::new().filter(Filter::eq("name", "customer-01"));
        assert!(!service.get_exists(&deleted_name).unwrap());
        assert!(service
            .get_exists(&deleted_name.clone().include_deleted(true))
            .unwrap());
        let marker = QuerySpec::new().filter(Filter::is_not_null("date_of_deletion"));
        assert_eq!(service.get_count(&marker).unwrap(), 0);
    }
}

#[test]
fn include_loads_declared_relations() {
    let uow = seeded_unit(Dialect::MsSql, 2);
    let repo = repository();
    let first = repo
        .get_first(&uow, &QuerySpec::new().order_by_asc("id"))
        .unwrap()
        .unwrap();
    let id = first.id().unwrap();
    uow.session()
        .unwrap()
        .execute(
            "INSERT INTO customer_addresses (customer_id, line) VALUES (?1, ?2), (?1, ?3);",
            params![id, "2 Side St", "1 Main St"],
        )
        .unwrap();

    let without = repo.get_by_id(&uow, id, false).unwrap().unwrap();
    assert!(without.addresses.is_empty());

    let with = repo
        .get_one(
            &uow,
            &QuerySpec::new()
                .filter(Filter::eq("id", id))
                .include("addresses"),
        )
        .unwrap()
        .unwrap();
    assert_eq!(with.addresses, vec!["1 Main St", "2 Side St"]);
}

#[test]
fn unknown_columns_and_relations_are_invalid_queries() {
    let uow = seeded_unit(Dialect::MsSql, 1);
    let repo = repository();

    let err = repo
        .get(&uow, &QuerySpec::new().filter(Filter::eq("password", "x")))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery(_)));

    let err = repo
        .get(&uow, &QuerySpec::new().order_by_asc("row_version"))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery(_)));

    let err = repo
        .get_all(&uow, &QuerySpec::new().include("orders"))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery(_)));
}

#[test]
fn staging_does_not_assign_backend_values() {
    let repo = repository();
    let mut uow = unit_of_work(Dialect::PostgreSql);
    let mut customer = Customer::new("staged");

    let ticket = repo.insert_one(&mut uow, &mut customer).unwrap();
    assert!(customer.id().is_none());
    assert_eq!(customer.audit().date_of_creation(), Some(NOW));
    assert_eq!(uow.pending(), 1);
    assert_eq!(repo.get_count(&uow, &QuerySpec::new()).unwrap(), 0);

    let report = uow.save().unwrap();
    let outcome = report.outcome(ticket).unwrap();
    assert!(outcome.global_id.is_some());
    assert!(outcome.token.is_some());
    assert_eq!(repo.get_count(&uow, &QuerySpec::new()).unwrap(), 1);
}

#[test]
fn soft_delete_by_id_skips_already_deleted_rows() {
    let mut service = service(Dialect::MySql);
    let customer = seed(&mut service, 1).remove(0);
    let id = customer.id().unwrap();
    service.delete_soft_by_id(id).unwrap();

    let repo = repository();
    let mut uow = unit_of_work(Dialect::MySql);
    let err = repo.delete_soft_by_id(&mut uow, id).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { .. }));

    let mut reloaded = service.get_by_id(id, true).unwrap().unwrap();
    let err = repo.delete_soft_one(&mut uow, &mut reloaded).unwrap_err();
    assert!(matches!(err, RepoError::Lifecycle { .. }));
    assert_eq!(reloaded.audit().date_of_deletion(), Some(NOW));
    assert_eq!(uow.pending(), 0);
}

#[test]
fn global_id_filters_match_each_dialect_encoding() {
    for dialect in Dialect::ALL {
        let mut service = service(dialect);
        let customers = seed(&mut service, 3);
        let target = &customers[1];
        let global_id = target.global_id().unwrap();

        let found = service
            .get_one(&QuerySpec::new().filter(Filter::eq("global_id", global_id)))
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), target.id(), "{dialect}");
        assert_eq!(found.global_id(), Some(global_id), "{dialect}");

        let others = QuerySpec::new().filter(Filter::ne("global_id", global_id));
        assert_eq!(service.get_count(&others).unwrap(), 2, "{dialect}");
        let unknown = QuerySpec::new().filter(Filter::eq("global_id", uuid::Uuid::new_v4()));
        assert!(!service.get_exists(&unknown).unwrap(), "{dialect}");
    }
}

#[tokio::test]
async fn async_reads_match_sync_reads() {
    let uow = seeded_unit(Dialect::MySql, 5);
    let repo = repository();
    let spec = QuerySpec::new().filter(Filter::eq("city", "Oslo")).order_by_asc("id");

    let sync_rows = names(&repo.get(&uow, &spec).unwrap());
    let async_rows = names(&repo.get_async(&uow, &spec).await.unwrap());
    assert_eq!(sync_rows, async_rows);
    assert_eq!(repo.get_count_async(&uow, &spec).await.unwrap(), 3);
    assert!(repo.get_exists_async(&uow, &spec).await.unwrap());
    assert_eq!(
        repo.get_first_async(&uow, &spec).await.unwrap().unwrap().name,
        "customer-00"
    );
}
