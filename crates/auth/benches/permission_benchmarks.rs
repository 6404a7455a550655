use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use scribe_auth::{Permission, PermissionSet, Role, RolePermissionSource, StaticRolePermissions, authorize};

fn source(roles: usize, perms_per_role: usize) -> StaticRolePermissions {
    (0..roles).fold(StaticRolePermissions::new(), |acc, r| {
        acc.grant(
            Role::new(format!("role-{r}")),
            (0..perms_per_role).map(|p| Permission::new(format!("module-{r}.action-{p}"))),
        )
    })
}

fn bench_resolve(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("resolve_permission_set");

    for roles in [1usize, 4, 16] {
        let src = source(roles, 32);
        let held: Vec<Role> = (0..roles).map(|r| Role::new(format!("role-{r}"))).collect();
        group.bench_with_input(BenchmarkId::from_parameter(roles), &held, |b, held| {
            b.iter(|| rt.block_on(src.permissions_for_roles(black_box(held))).unwrap())
        });
    }
    group.finish();
}

fn bench_check(c: &mut Criterion) {
    let set: PermissionSet = (0..512).map(|i| Permission::new(format!("perm-{i}"))).collect();
    let hit = Permission::new("perm-300");
    let miss = Permission::new("perm-none");

    c.bench_function("authorize_hit", |b| b.iter(|| authorize(black_box(&set), black_box(&hit))));
    c.bench_function("authorize_miss", |b| b.iter(|| authorize(black_box(&set), black_box(&miss))));
}

criterion_group!(benches, bench_resolve, bench_check);
criterion_main!(benches);
